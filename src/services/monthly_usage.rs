//! Monthly usage rollups per catalog item.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::{run_in_transaction, transaction::for_update};
use crate::entities::monthly_usage_summary::{self, Entity as MonthlyUsageSummary};
use crate::errors::ServiceError;
use crate::services::drum_registry;

/// Calendar bucket of a usage date.
pub fn period_of(date: DateTime<Utc>) -> (i32, i32) {
    (date.month() as i32, date.year())
}

/// Outcome of `reset_month`.
#[derive(Debug, Clone, Serialize)]
pub struct MonthResetReport {
    pub month: u32,
    pub year: i32,
    pub summaries_cleared: usize,
    pub total_restored: Decimal,
    pub items: Vec<ItemRestore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemRestore {
    pub item_id: Uuid,
    pub restored: Decimal,
    pub previous_stock: Decimal,
    pub new_stock: Decimal,
}

async fn lock_summary<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    month: i32,
    year: i32,
) -> Result<Option<monthly_usage_summary::Model>, ServiceError> {
    for_update(
        conn,
        MonthlyUsageSummary::find()
            .filter(monthly_usage_summary::Column::ItemId.eq(item_id))
            .filter(monthly_usage_summary::Column::Month.eq(month))
            .filter(monthly_usage_summary::Column::Year.eq(year)),
    )
    .one(conn)
    .await
    .map_err(ServiceError::db_error)
}

/// Adds `amount` to the item's total for the month of `usage_date`.
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    usage_date: DateTime<Utc>,
    amount: Decimal,
) -> Result<monthly_usage_summary::Model, ServiceError> {
    let (month, year) = period_of(usage_date);
    let now = Utc::now();

    match lock_summary(conn, item_id, month, year).await? {
        Some(summary) => {
            let total = (summary.total_used + amount).max(Decimal::ZERO);
            let mut active: monthly_usage_summary::ActiveModel = summary.into();
            active.total_used = Set(total);
            active.last_synced_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)
        }
        None => monthly_usage_summary::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(item_id),
            month: Set(month),
            year: Set(year),
            total_used: Set(amount.max(Decimal::ZERO)),
            last_synced_at: Set(now),
        }
        .insert(conn)
        .await
        .map_err(ServiceError::db_error),
    }
}

/// Takes `amount` back off the month's total, flooring at zero. A month
/// with no row (already reset) is left alone.
pub async fn reverse<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    usage_date: DateTime<Utc>,
    amount: Decimal,
) -> Result<Option<monthly_usage_summary::Model>, ServiceError> {
    let (month, year) = period_of(usage_date);
    let Some(summary) = lock_summary(conn, item_id, month, year).await? else {
        return Ok(None);
    };

    let total = (summary.total_used - amount).max(Decimal::ZERO);
    let mut active: monthly_usage_summary::ActiveModel = summary.into();
    active.total_used = Set(total);
    active.last_synced_at = Set(Utc::now());
    active
        .update(conn)
        .await
        .map(Some)
        .map_err(ServiceError::db_error)
}

pub async fn summaries_for_period<C: ConnectionTrait>(
    conn: &C,
    month: u32,
    year: i32,
) -> Result<Vec<monthly_usage_summary::Model>, ServiceError> {
    MonthlyUsageSummary::find()
        .filter(monthly_usage_summary::Column::Month.eq(month as i32))
        .filter(monthly_usage_summary::Column::Year.eq(year))
        .order_by_asc(monthly_usage_summary::Column::ItemId)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn summary_for<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    month: u32,
    year: i32,
) -> Result<Option<monthly_usage_summary::Model>, ServiceError> {
    MonthlyUsageSummary::find()
        .filter(monthly_usage_summary::Column::ItemId.eq(item_id))
        .filter(monthly_usage_summary::Column::Month.eq(month as i32))
        .filter(monthly_usage_summary::Column::Year.eq(year))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

pub fn validate_period(month: u32, year: i32) -> Result<(), ServiceError> {
    if !(1..=12).contains(&month) {
        return Err(ServiceError::ValidationError(format!(
            "Month must be between 1 and 12, got {}",
            month
        )));
    }
    if year < 1 {
        return Err(ServiceError::ValidationError(format!(
            "Year must be positive, got {}",
            year
        )));
    }
    Ok(())
}

/// Undoes a month's deductions at the catalog level.
///
/// Each summary's total goes back onto its item's stock and the summaries
/// are deleted, in one unit of work. Drum quantities, usage records and
/// history are not touched; `recalculate_all` brings the catalog back in
/// line with the drums afterwards.
pub async fn reset_month(
    db: &DatabaseConnection,
    month: u32,
    year: i32,
) -> Result<MonthResetReport, ServiceError> {
    validate_period(month, year)?;

    let report = run_in_transaction::<_, _, ServiceError>(db, "reset_month", move |txn| {
        Box::pin(async move {
            let summaries = for_update(
                txn,
                MonthlyUsageSummary::find()
                    .filter(monthly_usage_summary::Column::Month.eq(month as i32))
                    .filter(monthly_usage_summary::Column::Year.eq(year))
                    .order_by_asc(monthly_usage_summary::Column::ItemId),
            )
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

            let mut items = Vec::with_capacity(summaries.len());
            let mut total_restored = Decimal::ZERO;
            for summary in &summaries {
                let (previous_stock, new_stock) =
                    drum_registry::adjust_item_stock(txn, summary.item_id, summary.total_used)
                        .await?;
                total_restored += summary.total_used;
                items.push(ItemRestore {
                    item_id: summary.item_id,
                    restored: summary.total_used,
                    previous_stock,
                    new_stock,
                });
            }

            let deleted = MonthlyUsageSummary::delete_many()
                .filter(monthly_usage_summary::Column::Month.eq(month as i32))
                .filter(monthly_usage_summary::Column::Year.eq(year))
                .exec(txn)
                .await
                .map_err(ServiceError::db_error)?;

            Ok(MonthResetReport {
                month,
                year,
                summaries_cleared: deleted.rows_affected as usize,
                total_restored,
                items,
            })
        })
    })
    .await
    .map_err(ServiceError::into_transaction_failure)?;

    info!(
        month,
        year,
        summaries = report.summaries_cleared,
        restored = %report.total_restored,
        "Monthly usage reset"
    );
    Ok(report)
}
