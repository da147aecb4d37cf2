use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a drum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DrumStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "inactive")]
    Inactive,
    #[sea_orm(string_value = "empty")]
    Empty,
    #[sea_orm(string_value = "maintenance")]
    Maintenance,
}

impl DrumStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrumStatus::Active => "active",
            DrumStatus::Inactive => "inactive",
            DrumStatus::Empty => "empty",
            DrumStatus::Maintenance => "maintenance",
        }
    }

    /// Status a drum should carry after its quantity becomes `quantity`.
    ///
    /// A drum at or below zero is always `Empty`. `Maintenance` is an
    /// operator decision and survives quantity changes while cable remains.
    /// Otherwise drums at or under `low_threshold` are `Inactive`.
    pub fn derive(quantity: Decimal, current: DrumStatus, low_threshold: Decimal) -> DrumStatus {
        if quantity <= Decimal::ZERO {
            DrumStatus::Empty
        } else if current == DrumStatus::Maintenance {
            DrumStatus::Maintenance
        } else if quantity <= low_threshold {
            DrumStatus::Inactive
        } else {
            DrumStatus::Active
        }
    }
}

impl std::str::FromStr for DrumStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(DrumStatus::Active),
            "inactive" => Ok(DrumStatus::Inactive),
            "empty" => Ok(DrumStatus::Empty),
            "maintenance" => Ok(DrumStatus::Maintenance),
            other => Err(format!("unknown drum status '{}'", other)),
        }
    }
}

/// A physical spool of cable.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drums")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-assigned identity, e.g. `DR-001`.
    #[sea_orm(unique)]
    pub drum_number: String,
    pub item_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub initial_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub current_quantity: Decimal,
    pub status: DrumStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id"
    )]
    Item,
    #[sea_orm(has_many = "super::drum_usage::Entity")]
    Usages,
    #[sea_orm(has_many = "super::drum_history::Entity")]
    History,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl Related<super::drum_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usages.def()
    }
}

impl Related<super::drum_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::History.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
