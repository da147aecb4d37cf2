//! Usage ledger.
//!
//! A plain store of consumption records. Removing a record restores
//! nothing; the coordinator reverses its effect first.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::entities::{
    drum::Entity as Drum,
    drum_usage::{self, Entity as DrumUsage},
};
use crate::errors::ServiceError;
use crate::services::wastage::UsageMeasurement;

/// A usage about to be recorded.
#[derive(Debug, Clone)]
pub struct NewUsage {
    pub drum_id: Uuid,
    pub line_details_id: String,
    pub quantity_used: Decimal,
    pub wastage: Decimal,
    pub measurement: UsageMeasurement,
    pub usage_date: DateTime<Utc>,
}

pub async fn record_usage<C: ConnectionTrait>(
    conn: &C,
    usage: NewUsage,
) -> Result<drum_usage::Model, ServiceError> {
    if usage.quantity_used < Decimal::ZERO || usage.wastage < Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "Usage for line {} cannot be negative",
            usage.line_details_id
        )));
    }

    Drum::find_by_id(usage.drum_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::DrumNotFound(usage.drum_id.to_string()))?;

    let (start, end) = usage.measurement.points();
    drum_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        drum_id: Set(usage.drum_id),
        line_details_id: Set(usage.line_details_id),
        quantity_used: Set(usage.quantity_used),
        wastage_calculated: Set(usage.wastage),
        cable_start_point: Set(start),
        cable_end_point: Set(end),
        usage_date: Set(usage.usage_date),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)
}

/// The line's most recent usage, if any.
pub async fn find_current_usage<C: ConnectionTrait>(
    conn: &C,
    line_details_id: &str,
) -> Result<Option<drum_usage::Model>, ServiceError> {
    DrumUsage::find()
        .filter(drum_usage::Column::LineDetailsId.eq(line_details_id))
        .order_by_desc(drum_usage::Column::UsageDate)
        .order_by_desc(drum_usage::Column::CreatedAt)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn remove_usage<C: ConnectionTrait>(conn: &C, usage_id: Uuid) -> Result<(), ServiceError> {
    let result = DrumUsage::delete_by_id(usage_id)
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "Usage record {} not found",
            usage_id
        )));
    }
    Ok(())
}

/// A drum's usage history, oldest first.
pub async fn usages_for_drum<C: ConnectionTrait>(
    conn: &C,
    drum_id: Uuid,
) -> Result<Vec<drum_usage::Model>, ServiceError> {
    DrumUsage::find()
        .filter(drum_usage::Column::DrumId.eq(drum_id))
        .order_by_asc(drum_usage::Column::UsageDate)
        .order_by_asc(drum_usage::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Every usage recorded against a line, newest first.
pub async fn usages_for_line<C: ConnectionTrait>(
    conn: &C,
    line_details_id: &str,
) -> Result<Vec<drum_usage::Model>, ServiceError> {
    DrumUsage::find()
        .filter(drum_usage::Column::LineDetailsId.eq(line_details_id))
        .order_by_desc(drum_usage::Column::UsageDate)
        .order_by_desc(drum_usage::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}
