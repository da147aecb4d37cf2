use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::DatabaseTransaction;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::{run_in_transaction, DbPool};
use crate::entities::{
    drum::{self, DrumStatus},
    drum_history::HistoryAction,
    drum_usage, item,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{
    drum_registry::{self, DrumOptions},
    history::{self, HistoryEntry},
    locks::KeyedLocks,
    monthly_usage::{self, MonthResetReport},
    usage_ledger::{self, NewUsage},
    wastage::{self, to_stored_length, UsageMeasurement, RECALCULATION_EPSILON},
};

/// Tunables for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// Drums at or under this many meters are marked inactive.
    pub low_quantity_threshold: Decimal,
    /// Drums recalculated at once by `recalculate_all`.
    pub recalculation_concurrency: usize,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            low_quantity_threshold: dec!(100),
            recalculation_concurrency: 4,
        }
    }
}

/// A usage row coming from the spreadsheet sync.
#[derive(Debug, Clone)]
pub struct SyncUsage {
    pub drum_number: String,
    pub line_details_id: String,
    pub quantity_used: Decimal,
    pub measurement: UsageMeasurement,
    /// Catalog item for drums this sync creates.
    pub item_id: Option<Uuid>,
    /// Capacity for drums this sync creates.
    pub initial_quantity: Option<Decimal>,
    pub sync_connection_id: Option<String>,
    pub usage_date: DateTime<Utc>,
}

/// The previous usage of a line, put back onto its drum.
#[derive(Debug, Clone, Serialize)]
pub struct RestoredUsage {
    pub drum_id: Uuid,
    pub drum_number: String,
    pub amount: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
}

/// A new usage deducted from its drum.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedUsage {
    pub usage: drum_usage::Model,
    pub drum_number: String,
    pub deduction: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageOutcome {
    pub restored: Option<RestoredUsage>,
    pub applied: Option<AppliedUsage>,
    /// Set when a sync created the drum it used.
    pub created_drum: Option<drum::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalculationOutcome {
    pub drum_id: Uuid,
    pub drum_number: String,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub total_wastage: Decimal,
    pub records_considered: usize,
    pub adjusted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalculationFailure {
    /// Drum number, or `catalog` for the reconciliation step.
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogReconciliation {
    pub item_id: Uuid,
    pub previous_stock: Decimal,
    pub new_stock: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecalculationReport {
    pub outcomes: Vec<RecalculationOutcome>,
    pub failures: Vec<RecalculationFailure>,
    pub catalog: Vec<CatalogReconciliation>,
}

impl RecalculationReport {
    pub fn adjusted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.adjusted).count()
    }
}

/// Where a line's usage should land.
#[derive(Debug, Clone)]
struct UsageTarget {
    drum_number: String,
    quantity_used: Decimal,
    measurement: UsageMeasurement,
    usage_date: DateTime<Utc>,
    sync_connection_id: Option<String>,
    /// Create the drum on first reference.
    create: Option<DrumOptions>,
}

fn line_key(line_details_id: &str) -> String {
    format!("line:{}", line_details_id)
}

fn drum_key(drum_number: &str) -> String {
    format!("drum:{}", drum_number)
}

fn validate_quantity(quantity: Decimal) -> Result<(), ServiceError> {
    if quantity < Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "Quantity must not be negative, got {}",
            quantity.normalize()
        )));
    }
    Ok(())
}

/// Consumption coordinator.
///
/// The only writer of drum quantities, catalog stock and monthly rollups.
/// Each operation takes its in-process keys (line first, then drums in
/// sorted order) and runs as one unit of work; events go out after commit.
#[derive(Clone)]
pub struct ConsumptionCoordinator {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    policy: LedgerPolicy,
    locks: Arc<KeyedLocks>,
}

impl ConsumptionCoordinator {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, policy: LedgerPolicy) -> Self {
        Self {
            db_pool,
            event_sender,
            policy,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn db(&self) -> &DbPool {
        self.db_pool.as_ref()
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Adds a catalog item.
    #[instrument(skip(self))]
    pub async fn create_item(
        &self,
        name: &str,
        drum_size: Option<Decimal>,
        current_stock: Decimal,
    ) -> Result<item::Model, ServiceError> {
        let item = drum_registry::create_item(
            self.db(),
            name,
            drum_size.map(to_stored_length),
            to_stored_length(current_stock),
        )
        .await?;
        info!(item_id = %item.id, name = %item.name, "Catalog item created");
        Ok(item)
    }

    /// Returns the drum numbered `drum_number`, creating it if needed.
    #[instrument(skip(self))]
    pub async fn find_or_create(
        &self,
        drum_number: &str,
        mut opts: DrumOptions,
    ) -> Result<drum::Model, ServiceError> {
        opts.initial_quantity = opts.initial_quantity.map(to_stored_length);
        let number = drum_number.trim().to_string();
        let _guard = self.locks.acquire(drum_key(&number)).await;

        let (drum, created) =
            run_in_transaction::<_, _, ServiceError>(self.db(), "find_or_create_drum", move |txn| {
                Box::pin(async move { drum_registry::find_or_create(txn, &number, &opts).await })
            })
            .await
            .map_err(ServiceError::into_transaction_failure)?;

        if created {
            self.publish(vec![Event::DrumCreated {
                drum_id: drum.id,
                drum_number: drum.drum_number.clone(),
                initial_quantity: drum.initial_quantity,
            }])
            .await;
        }
        Ok(drum)
    }

    /// Sets the cable a line used, replacing whatever it used before.
    ///
    /// `None` or a zero quantity clears the line's usage.
    pub async fn apply_usage(
        &self,
        line_details_id: &str,
        drum_number: Option<&str>,
        quantity_used: Decimal,
    ) -> Result<UsageOutcome, ServiceError> {
        self.apply_usage_at(line_details_id, drum_number, quantity_used, Utc::now())
            .await
    }

    /// `apply_usage` with an explicit usage date for monthly bucketing.
    #[instrument(skip(self))]
    pub async fn apply_usage_at(
        &self,
        line_details_id: &str,
        drum_number: Option<&str>,
        quantity_used: Decimal,
        usage_date: DateTime<Utc>,
    ) -> Result<UsageOutcome, ServiceError> {
        validate_quantity(quantity_used)?;
        let target = drum_number.map(|number| UsageTarget {
            drum_number: number.trim().to_string(),
            quantity_used: to_stored_length(quantity_used),
            measurement: UsageMeasurement::Heuristic,
            usage_date,
            sync_connection_id: None,
            create: None,
        });
        self.run_usage("apply_usage", line_details_id, target).await
    }

    /// Records a usage from the spreadsheet sync, creating the drum on
    /// first reference and charging wastage from the cable readings when
    /// the sheet has them.
    #[instrument(skip(self), fields(drum_number = %usage.drum_number, line = %usage.line_details_id))]
    pub async fn record_sync_usage(&self, usage: SyncUsage) -> Result<UsageOutcome, ServiceError> {
        validate_quantity(usage.quantity_used)?;
        if let Some(quantity) = usage.initial_quantity {
            validate_quantity(quantity)?;
        }
        let target = UsageTarget {
            drum_number: usage.drum_number.trim().to_string(),
            quantity_used: to_stored_length(usage.quantity_used),
            measurement: usage.measurement.to_stored(),
            usage_date: usage.usage_date,
            sync_connection_id: usage.sync_connection_id.clone(),
            create: Some(DrumOptions {
                item_id: usage.item_id,
                initial_quantity: usage.initial_quantity.map(to_stored_length),
                sync_connection_id: usage.sync_connection_id,
            }),
        };
        self.run_usage("record_sync_usage", &usage.line_details_id, Some(target))
            .await
    }

    async fn run_usage(
        &self,
        label: &'static str,
        line_details_id: &str,
        target: Option<UsageTarget>,
    ) -> Result<UsageOutcome, ServiceError> {
        let line = line_details_id.trim().to_string();
        if line.is_empty() {
            return Err(ServiceError::ValidationError(
                "Line details id must not be empty".to_string(),
            ));
        }

        let _line_guard = self.locks.acquire(line_key(&line)).await;

        // The line key pins the line's current usage, so its drum can be
        // looked up before taking the drum keys.
        let mut drum_keys = Vec::with_capacity(2);
        if let Some(current) = usage_ledger::find_current_usage(self.db(), &line).await? {
            let old_drum = drum_registry::get_drum(self.db(), current.drum_id).await?;
            drum_keys.push(drum_key(&old_drum.drum_number));
        }
        if let Some(target) = &target {
            drum_keys.push(drum_key(&target.drum_number));
        }
        let _drum_guards = self.locks.acquire_many(drum_keys).await;

        let threshold = self.policy.low_quantity_threshold;
        let txn_line = line.clone();
        let result = run_in_transaction::<_, _, ServiceError>(self.db(), label, move |txn| {
            Box::pin(async move { apply_in_txn(txn, &txn_line, target, threshold).await })
        })
        .await;

        let (outcome, events) = match result {
            Ok(done) => done,
            Err(e) => {
                if matches!(e, ServiceError::InsufficientStock { .. }) {
                    counter!("drum_ledger.usage.insufficient_stock", 1);
                }
                warn!(line = %line, error = %e, "Usage update rolled back");
                return Err(e.into_transaction_failure());
            }
        };

        if let Some(restored) = &outcome.restored {
            counter!("drum_ledger.usage.cleared", 1);
            info!(
                line = %line,
                drum_number = %restored.drum_number,
                restored = %restored.amount,
                quantity = %restored.new_quantity,
                "Previous usage restored"
            );
        }
        if let Some(applied) = &outcome.applied {
            counter!("drum_ledger.usage.applied", 1);
            info!(
                line = %line,
                drum_number = %applied.drum_number,
                used = %applied.usage.quantity_used,
                wastage = %applied.usage.wastage_calculated,
                quantity = %applied.new_quantity,
                "Usage applied"
            );
        }

        self.publish(events).await;
        Ok(outcome)
    }

    /// Recomputes a drum's quantity from its usage history.
    ///
    /// Differences within `RECALCULATION_EPSILON` write nothing, so a second
    /// call with no usage changes in between is a no-op.
    #[instrument(skip(self))]
    pub async fn recalculate(&self, drum_number: &str) -> Result<RecalculationOutcome, ServiceError> {
        let number = drum_number.trim().to_string();
        let _guard = self.locks.acquire(drum_key(&number)).await;
        let threshold = self.policy.low_quantity_threshold;

        let (outcome, events) =
            run_in_transaction::<_, _, ServiceError>(self.db(), "recalculate_drum", move |txn| {
                Box::pin(async move { recalculate_in_txn(txn, &number, threshold).await })
            })
            .await
            .map_err(ServiceError::into_transaction_failure)?;

        if outcome.adjusted {
            counter!("drum_ledger.recalculation.adjusted", 1);
            info!(
                drum_number = %outcome.drum_number,
                previous = %outcome.previous_quantity,
                quantity = %outcome.new_quantity,
                records = outcome.records_considered,
                "Drum recalculated"
            );
        }
        self.publish(events).await;
        Ok(outcome)
    }

    /// Recalculates every drum, then rebuilds each item's stock from its
    /// drums. One drum failing does not stop the others.
    #[instrument(skip(self))]
    pub async fn recalculate_all(&self) -> Result<RecalculationReport, ServiceError> {
        let drums = drum_registry::list_drums(self.db()).await?;
        let concurrency = self.policy.recalculation_concurrency.max(1);
        info!(drums = drums.len(), concurrency, "Recalculating all drums");

        let results: Vec<(String, Result<RecalculationOutcome, ServiceError>)> =
            stream::iter(drums)
                .map(|drum| async move {
                    let result = self.recalculate(&drum.drum_number).await;
                    (drum.drum_number, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut report = RecalculationReport::default();
        for (drum_number, result) in results {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    counter!("drum_ledger.recalculation.failed", 1);
                    error!(drum_number = %drum_number, error = %e, "Drum recalculation failed");
                    report.failures.push(RecalculationFailure {
                        target: drum_number,
                        message: e.to_string(),
                    });
                }
            }
        }
        report
            .outcomes
            .sort_by(|a, b| a.drum_number.cmp(&b.drum_number));

        match self.reconcile_catalog().await {
            Ok(catalog) => report.catalog = catalog,
            Err(e) => {
                counter!("drum_ledger.recalculation.failed", 1);
                error!(error = %e, "Catalog reconciliation failed");
                report.failures.push(RecalculationFailure {
                    target: "catalog".to_string(),
                    message: e.to_string(),
                });
            }
        }

        info!(
            adjusted = report.adjusted_count(),
            failed = report.failures.len(),
            "Recalculation finished"
        );
        Ok(report)
    }

    /// Sets each item's stock to the sum of its drums' quantities.
    /// Only items that change are reported.
    #[instrument(skip(self))]
    pub async fn reconcile_catalog(&self) -> Result<Vec<CatalogReconciliation>, ServiceError> {
        run_in_transaction::<_, _, ServiceError>(self.db(), "reconcile_catalog", |txn| {
            Box::pin(async move {
                let mut changes = Vec::new();
                for item in drum_registry::lock_items(txn).await? {
                    let total: Decimal = drum_registry::list_for_item(txn, item.id)
                        .await?
                        .iter()
                        .map(|drum| drum.current_quantity)
                        .sum();
                    if total == item.current_stock {
                        continue;
                    }
                    let item_id = item.id;
                    let previous_stock = item.current_stock;
                    drum_registry::set_item_stock(txn, item, total).await?;
                    changes.push(CatalogReconciliation {
                        item_id,
                        previous_stock,
                        new_stock: total,
                    });
                }
                Ok(changes)
            })
        })
        .await
        .map_err(ServiceError::into_transaction_failure)
    }

    /// Operator status change, e.g. sending a drum to maintenance.
    ///
    /// A drum with no cable stays `empty`.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        drum_number: &str,
        status: DrumStatus,
        notes: Option<String>,
    ) -> Result<drum::Model, ServiceError> {
        let number = drum_number.trim().to_string();
        let _guard = self.locks.acquire(drum_key(&number)).await;

        let (drum, events) =
            run_in_transaction::<_, _, ServiceError>(self.db(), "set_drum_status", move |txn| {
                Box::pin(async move {
                    let drum = drum_registry::lock_by_number(txn, &number).await?;
                    if status != DrumStatus::Empty && drum.current_quantity <= Decimal::ZERO {
                        return Err(ServiceError::ValidationError(format!(
                            "Drum {} has no cable left and cannot be marked {}",
                            drum.drum_number,
                            status.as_str()
                        )));
                    }
                    if drum.status == status {
                        return Ok((drum, Vec::new()));
                    }

                    let previous_status = drum.status;
                    let updated = drum_registry::set_status(txn, drum, status).await?;
                    let notes = notes.unwrap_or_else(|| {
                        format!(
                            "Status changed from {} to {}",
                            previous_status.as_str(),
                            status.as_str()
                        )
                    });
                    history::append(
                        txn,
                        HistoryEntry::new(
                            updated.id,
                            HistoryAction::StatusChanged,
                            Some(updated.current_quantity),
                            updated.current_quantity,
                            Some(previous_status),
                            status,
                        )
                        .with_notes(notes),
                    )
                    .await?;

                    let event = Event::DrumStatusChanged {
                        drum_id: updated.id,
                        old_status: previous_status,
                        new_status: status,
                    };
                    Ok((updated, vec![event]))
                })
            })
            .await
            .map_err(ServiceError::into_transaction_failure)?;

        if !events.is_empty() {
            info!(drum_number = %drum.drum_number, status = drum.status.as_str(), "Drum status changed");
        }
        self.publish(events).await;
        Ok(drum)
    }

    /// Stock-take correction. The same delta goes onto the catalog item.
    #[instrument(skip(self))]
    pub async fn adjust_quantity_manually(
        &self,
        drum_number: &str,
        new_quantity: Decimal,
        notes: Option<String>,
    ) -> Result<drum::Model, ServiceError> {
        validate_quantity(new_quantity)?;
        let new_quantity = to_stored_length(new_quantity);
        let number = drum_number.trim().to_string();
        let _guard = self.locks.acquire(drum_key(&number)).await;
        let threshold = self.policy.low_quantity_threshold;

        let (drum, events) = run_in_transaction::<_, _, ServiceError>(
            self.db(),
            "adjust_drum_quantity",
            move |txn| {
                Box::pin(async move {
                    let drum = drum_registry::lock_by_number(txn, &number).await?;
                    if drum.current_quantity == new_quantity {
                        return Ok((drum, Vec::new()));
                    }

                    let previous_quantity = drum.current_quantity;
                    let previous_status = drum.status;
                    let item_id = drum.item_id;
                    let updated =
                        drum_registry::set_quantity(txn, drum, new_quantity, None, threshold)
                            .await?;
                    let delta = updated.current_quantity - previous_quantity;
                    if let Some(item_id) = item_id {
                        drum_registry::adjust_item_stock(txn, item_id, delta).await?;
                    }

                    let notes = notes.unwrap_or_else(|| {
                        format!("Manual adjustment of {}m", delta.normalize())
                    });
                    history::append(
                        txn,
                        HistoryEntry::new(
                            updated.id,
                            HistoryAction::QuantityAdjusted,
                            Some(previous_quantity),
                            updated.current_quantity,
                            Some(previous_status),
                            updated.status,
                        )
                        .with_notes(notes),
                    )
                    .await?;

                    let mut events = vec![Event::DrumQuantityAdjusted {
                        drum_id: updated.id,
                        previous_quantity,
                        new_quantity: updated.current_quantity,
                    }];
                    push_status_change(&mut events, updated.id, previous_status, updated.status);
                    Ok((updated, events))
                })
            },
        )
        .await
        .map_err(ServiceError::into_transaction_failure)?;

        if !events.is_empty() {
            info!(drum_number = %drum.drum_number, quantity = %drum.current_quantity, "Drum quantity adjusted");
        }
        self.publish(events).await;
        Ok(drum)
    }

    /// Puts a month's rolled-up usage back onto catalog stock and clears
    /// the month. Drums are left as they are until `recalculate_all`.
    #[instrument(skip(self))]
    pub async fn reset_month(&self, month: u32, year: i32) -> Result<MonthResetReport, ServiceError> {
        let report = monthly_usage::reset_month(self.db(), month, year).await?;
        counter!("drum_ledger.monthly.reset", 1);
        self.publish(vec![Event::MonthReset {
            month,
            year,
            total_restored: report.total_restored,
            timestamp: Utc::now(),
        }])
        .await;
        Ok(report)
    }

    async fn publish(&self, events: Vec<Event>) {
        for event in events {
            self.event_sender.publish(event).await;
        }
    }
}

fn push_status_change(events: &mut Vec<Event>, drum_id: Uuid, old: DrumStatus, new: DrumStatus) {
    if old != new {
        events.push(Event::DrumStatusChanged {
            drum_id,
            old_status: old,
            new_status: new,
        });
    }
}

/// Reverse-and-replace for one line, inside the caller's unit of work.
///
/// The old usage is fully restored before the new deduction is checked, so
/// re-applying a line to the same drum never fails for lack of stock.
async fn apply_in_txn(
    txn: &DatabaseTransaction,
    line: &str,
    target: Option<UsageTarget>,
    threshold: Decimal,
) -> Result<(UsageOutcome, Vec<Event>), ServiceError> {
    let mut outcome = UsageOutcome::default();
    let mut events = Vec::new();
    let sync_connection_id = target.as_ref().and_then(|t| t.sync_connection_id.clone());

    if let Some(previous) = usage_ledger::find_current_usage(txn, line).await? {
        let restored =
            restore_usage(txn, &previous, sync_connection_id, threshold, &mut events).await?;
        outcome.restored = Some(restored);
    }

    let Some(target) = target else {
        return Ok((outcome, events));
    };
    if target.quantity_used <= Decimal::ZERO {
        return Ok((outcome, events));
    }

    let drum = match &target.create {
        Some(opts) => {
            let (drum, created) =
                drum_registry::find_or_create(txn, &target.drum_number, opts).await?;
            if created {
                events.push(Event::DrumCreated {
                    drum_id: drum.id,
                    drum_number: drum.drum_number.clone(),
                    initial_quantity: drum.initial_quantity,
                });
                outcome.created_drum = Some(drum.clone());
            }
            drum_registry::lock_by_id(txn, drum.id).await?
        }
        None => drum_registry::lock_by_number(txn, &target.drum_number).await?,
    };

    let wastage = wastage::wastage_for(target.quantity_used, &target.measurement);
    let deduction = target.quantity_used + wastage;
    if deduction > drum.current_quantity {
        return Err(ServiceError::insufficient_stock(
            &drum.drum_number,
            drum.current_quantity,
            deduction,
        ));
    }

    let previous_quantity = drum.current_quantity;
    let previous_status = drum.status;
    let drum_number = drum.drum_number.clone();
    let item_id = drum.item_id;
    let updated =
        drum_registry::set_quantity(txn, drum, previous_quantity - deduction, None, threshold)
            .await?;

    if let Some(item_id) = item_id {
        drum_registry::adjust_item_stock(txn, item_id, -deduction).await?;
        monthly_usage::record(txn, item_id, target.usage_date, deduction).await?;
    }

    let usage = usage_ledger::record_usage(
        txn,
        NewUsage {
            drum_id: updated.id,
            line_details_id: line.to_string(),
            quantity_used: target.quantity_used,
            wastage,
            measurement: target.measurement,
            usage_date: target.usage_date,
        },
    )
    .await?;

    history::append(
        txn,
        HistoryEntry::new(
            updated.id,
            HistoryAction::UsageAdded,
            Some(previous_quantity),
            updated.current_quantity,
            Some(previous_status),
            updated.status,
        )
        .with_line(line)
        .with_sync_connection(target.sync_connection_id.clone())
        .with_notes(format!(
            "Used {}m plus {}m wastage for line {}",
            target.quantity_used.normalize(),
            wastage.normalize(),
            line
        )),
    )
    .await?;

    events.push(Event::UsageApplied {
        drum_id: updated.id,
        drum_number: drum_number.clone(),
        line_details_id: line.to_string(),
        quantity_used: target.quantity_used,
        wastage,
        new_quantity: updated.current_quantity,
    });
    push_status_change(&mut events, updated.id, previous_status, updated.status);

    outcome.applied = Some(AppliedUsage {
        usage,
        drum_number,
        deduction,
        previous_quantity,
        new_quantity: updated.current_quantity,
    });
    Ok((outcome, events))
}

/// Puts a superseded usage back onto its drum, item and month, then
/// deletes it.
async fn restore_usage(
    txn: &DatabaseTransaction,
    previous: &drum_usage::Model,
    sync_connection_id: Option<String>,
    threshold: Decimal,
    events: &mut Vec<Event>,
) -> Result<RestoredUsage, ServiceError> {
    let drum = drum_registry::lock_by_id(txn, previous.drum_id).await?;
    let amount = previous.deducted();
    let previous_quantity = drum.current_quantity;
    let previous_status = drum.status;
    let drum_number = drum.drum_number.clone();
    let item_id = drum.item_id;

    let updated =
        drum_registry::set_quantity(txn, drum, previous_quantity + amount, None, threshold).await?;

    if let Some(item_id) = item_id {
        drum_registry::adjust_item_stock(txn, item_id, amount).await?;
        monthly_usage::reverse(txn, item_id, previous.usage_date, amount).await?;
    }

    history::append(
        txn,
        HistoryEntry::new(
            updated.id,
            HistoryAction::QuantityAdjusted,
            Some(previous_quantity),
            updated.current_quantity,
            Some(previous_status),
            updated.status,
        )
        .with_line(previous.line_details_id.clone())
        .with_sync_connection(sync_connection_id)
        .with_notes(format!(
            "Restored {}m from superseded usage on line {}",
            amount.normalize(),
            previous.line_details_id
        )),
    )
    .await?;

    usage_ledger::remove_usage(txn, previous.id).await?;

    events.push(Event::UsageCleared {
        drum_id: updated.id,
        line_details_id: previous.line_details_id.clone(),
        restored: amount,
    });
    push_status_change(events, updated.id, previous_status, updated.status);

    Ok(RestoredUsage {
        drum_id: updated.id,
        drum_number,
        amount,
        previous_quantity,
        new_quantity: updated.current_quantity,
    })
}

async fn recalculate_in_txn(
    txn: &DatabaseTransaction,
    drum_number: &str,
    threshold: Decimal,
) -> Result<(RecalculationOutcome, Vec<Event>), ServiceError> {
    let drum = drum_registry::lock_by_number(txn, drum_number).await?;
    let capacity = match drum.item_id {
        Some(item_id) => drum_registry::get_item(txn, item_id)
            .await?
            .drum_size
            .unwrap_or(drum.initial_quantity),
        None => drum.initial_quantity,
    };
    let usages = usage_ledger::usages_for_drum(txn, drum.id).await?;
    let estimate = wastage::estimate(&usages, capacity, drum.status, threshold);

    let mut outcome = RecalculationOutcome {
        drum_id: drum.id,
        drum_number: drum.drum_number.clone(),
        previous_quantity: drum.current_quantity,
        new_quantity: drum.current_quantity,
        total_wastage: estimate.total_wastage,
        records_considered: estimate.records_considered,
        adjusted: false,
    };

    let delta = estimate.calculated_current_quantity - drum.current_quantity;
    if delta.abs() <= RECALCULATION_EPSILON {
        return Ok((outcome, Vec::new()));
    }

    let previous_quantity = drum.current_quantity;
    let previous_status = drum.status;
    let item_id = drum.item_id;
    let updated = drum_registry::set_quantity(
        txn,
        drum,
        estimate.calculated_current_quantity,
        None,
        threshold,
    )
    .await?;

    if let Some(item_id) = item_id {
        drum_registry::adjust_item_stock(txn, item_id, delta).await?;
    }

    history::append(
        txn,
        HistoryEntry::new(
            updated.id,
            HistoryAction::QuantityAdjusted,
            Some(previous_quantity),
            updated.current_quantity,
            Some(previous_status),
            updated.status,
        )
        .with_notes(format!(
            "Recalculated from {} usage records; total wastage {}m",
            estimate.records_considered,
            estimate.total_wastage.normalize()
        )),
    )
    .await?;

    let mut events = vec![Event::DrumRecalculated {
        drum_id: updated.id,
        previous_quantity,
        new_quantity: updated.current_quantity,
    }];
    push_status_change(&mut events, updated.id, previous_status, updated.status);

    outcome.new_quantity = updated.current_quantity;
    outcome.adjusted = true;
    Ok((outcome, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_policy() {
        let policy = LedgerPolicy::default();
        assert_eq!(policy.low_quantity_threshold, dec!(100));
        assert_eq!(policy.recalculation_concurrency, 4);
    }

    #[test]
    fn negative_quantities_are_rejected() {
        assert_matches!(
            validate_quantity(dec!(-0.5)),
            Err(ServiceError::InvalidQuantity(_))
        );
        assert!(validate_quantity(Decimal::ZERO).is_ok());
    }

    #[test]
    fn lock_keys_are_namespaced() {
        assert_eq!(line_key("L-1"), "line:L-1");
        assert_eq!(drum_key("DR-001"), "drum:DR-001");
    }
}
