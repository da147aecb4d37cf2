//! Drum history trail.
//!
//! `append` is the only writer. Rows are never updated or deleted, and the
//! integer key orders them by the transaction that wrote them.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::entities::{
    drum::DrumStatus,
    drum_history::{self, Entity as DrumHistory, HistoryAction},
};
use crate::errors::ServiceError;

/// One history row to be appended.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub drum_id: Uuid,
    pub action: HistoryAction,
    pub previous_quantity: Option<Decimal>,
    pub new_quantity: Decimal,
    pub previous_status: Option<DrumStatus>,
    pub new_status: DrumStatus,
    pub line_details_id: Option<String>,
    pub sync_connection_id: Option<String>,
    pub notes: Option<String>,
}

impl HistoryEntry {
    pub fn new(
        drum_id: Uuid,
        action: HistoryAction,
        previous_quantity: Option<Decimal>,
        new_quantity: Decimal,
        previous_status: Option<DrumStatus>,
        new_status: DrumStatus,
    ) -> Self {
        Self {
            drum_id,
            action,
            previous_quantity,
            new_quantity,
            previous_status,
            new_status,
            line_details_id: None,
            sync_connection_id: None,
            notes: None,
        }
    }

    pub fn with_line(mut self, line_details_id: impl Into<String>) -> Self {
        self.line_details_id = Some(line_details_id.into());
        self
    }

    pub fn with_sync_connection(mut self, sync_connection_id: Option<String>) -> Self {
        self.sync_connection_id = sync_connection_id;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Signed delta this row records. A `created` row counts from zero.
    pub fn quantity_change(&self) -> Decimal {
        self.new_quantity - self.previous_quantity.unwrap_or(Decimal::ZERO)
    }
}

/// Appends one row. `quantity_change` is always derived from the
/// before/after pair so the two can never disagree.
pub async fn append<C: ConnectionTrait>(
    conn: &C,
    entry: HistoryEntry,
) -> Result<drum_history::Model, ServiceError> {
    let quantity_change = entry.quantity_change();
    let row = drum_history::ActiveModel {
        drum_id: Set(entry.drum_id),
        action: Set(entry.action),
        previous_quantity: Set(entry.previous_quantity),
        new_quantity: Set(entry.new_quantity),
        quantity_change: Set(quantity_change),
        previous_status: Set(entry.previous_status),
        new_status: Set(entry.new_status),
        line_details_id: Set(entry.line_details_id),
        sync_connection_id: Set(entry.sync_connection_id),
        notes: Set(entry.notes),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    row.insert(conn).await.map_err(ServiceError::db_error)
}

/// A drum's full timeline, oldest first.
pub async fn history_for_drum<C: ConnectionTrait>(
    conn: &C,
    drum_id: Uuid,
) -> Result<Vec<drum_history::Model>, ServiceError> {
    DrumHistory::find()
        .filter(drum_history::Column::DrumId.eq(drum_id))
        .order_by_asc(drum_history::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Folds a timeline into the quantity it ends at, or `None` when empty.
pub fn replay(entries: &[drum_history::Model]) -> Option<Decimal> {
    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .fold(Decimal::ZERO, |quantity, entry| quantity + entry.quantity_change),
    )
}

/// Whether every row picks up where the previous one left off.
pub fn is_continuous(entries: &[drum_history::Model]) -> bool {
    entries.windows(2).all(|pair| {
        pair[1].previous_quantity == Some(pair[0].new_quantity)
            && pair[1].previous_status == Some(pair[0].new_status)
    })
}
