use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::drum::DrumStatus;

/// What kind of mutation a history row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "usage_added")]
    UsageAdded,
    #[sea_orm(string_value = "quantity_adjusted")]
    QuantityAdjusted,
    #[sea_orm(string_value = "status_changed")]
    StatusChanged,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::UsageAdded => "usage_added",
            HistoryAction::QuantityAdjusted => "quantity_adjusted",
            HistoryAction::StatusChanged => "status_changed",
        }
    }
}

/// Append-only audit row. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drum_history")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub drum_id: Uuid,
    pub action: HistoryAction,
    /// `None` only for the `created` row.
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub previous_quantity: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub new_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity_change: Decimal,
    pub previous_status: Option<DrumStatus>,
    pub new_status: DrumStatus,
    pub line_details_id: Option<String>,
    pub sync_connection_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::drum::Entity",
        from = "Column::DrumId",
        to = "super::drum::Column::Id"
    )]
    Drum,
}

impl Related<super::drum::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Drum.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
