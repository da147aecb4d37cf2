use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One consumption event of cable from a drum for an installation line.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drum_usages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub drum_id: Uuid,
    pub line_details_id: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity_used: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub wastage_calculated: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub cable_start_point: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub cable_end_point: Option<Decimal>,
    pub usage_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Quantity this record removed from its drum.
    pub fn deducted(&self) -> Decimal {
        self.quantity_used + self.wastage_calculated
    }
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
