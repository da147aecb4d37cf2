use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog SKU a drum's cable belongs to, e.g. "Drop Wire Cable".
///
/// `current_stock` is a shadow total of drum deductions and is only written
/// by the consumption coordinator.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub current_stock: Decimal,
    /// Nominal capacity used when drums of this item are auto-created.
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub drum_size: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::drum::Entity")]
    Drums,
    #[sea_orm(has_many = "super::monthly_usage_summary::Entity")]
    MonthlySummaries,
}

impl Related<super::drum::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Drums.def()
    }
}

impl Related<super::monthly_usage_summary::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonthlySummaries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
