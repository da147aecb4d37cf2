#![allow(dead_code)]

use std::sync::Arc;

use drum_ledger::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{drum, drum_history, item},
    events::{self, Event, EventSender},
    services::{
        drum_registry::{self, DrumOptions},
        history, usage_ledger,
    },
    ConsumptionCoordinator, LedgerPolicy,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Ledger backed by a fresh in-memory SQLite database.
///
/// The pool holds exactly one connection; every connection to
/// `sqlite::memory:` is its own database.
pub struct TestLedger {
    pub coordinator: ConsumptionCoordinator,
    pub db: Arc<DbPool>,
    _event_task: Option<tokio::task::JoinHandle<()>>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_policy(LedgerPolicy::default()).await
    }

    pub async fn with_policy(policy: LedgerPolicy) -> Self {
        let db = Self::database().await;
        let (tx, rx) = mpsc::channel::<Event>(1024);
        let event_task = tokio::spawn(events::process_events(rx));
        let coordinator = ConsumptionCoordinator::new(db.clone(), EventSender::new(tx), policy);

        Self {
            coordinator,
            db,
            _event_task: Some(event_task),
        }
    }

    /// Ledger whose events are handed back to the test instead of drained.
    pub async fn capturing() -> (Self, mpsc::Receiver<Event>) {
        let db = Self::database().await;
        let (tx, rx) = mpsc::channel::<Event>(1024);
        let coordinator =
            ConsumptionCoordinator::new(db.clone(), EventSender::new(tx), LedgerPolicy::default());

        (
            Self {
                coordinator,
                db,
                _event_task: None,
            },
            rx,
        )
    }

    async fn database() -> Arc<DbPool> {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        Arc::new(pool)
    }

    /// Catalog item whose stock starts at `stock`.
    pub async fn item(&self, name: &str, drum_size: Decimal, stock: Decimal) -> item::Model {
        self.coordinator
            .create_item(name, Some(drum_size), stock)
            .await
            .expect("failed to create item")
    }

    pub async fn drum_for(&self, drum_number: &str, item: &item::Model) -> drum::Model {
        self.coordinator
            .find_or_create(
                drum_number,
                DrumOptions {
                    item_id: Some(item.id),
                    ..Default::default()
                },
            )
            .await
            .expect("failed to create drum")
    }

    pub async fn drum(&self, drum_number: &str) -> drum::Model {
        drum_registry::find_by_number(self.db.as_ref(), drum_number)
            .await
            .expect("drum lookup failed")
            .unwrap_or_else(|| panic!("drum {} missing", drum_number))
    }

    pub async fn quantity(&self, drum_number: &str) -> Decimal {
        self.drum(drum_number).await.current_quantity
    }

    pub async fn stock(&self, item_id: uuid::Uuid) -> Decimal {
        drum_registry::get_item(self.db.as_ref(), item_id)
            .await
            .expect("item lookup failed")
            .current_stock
    }

    pub async fn history(&self, drum_number: &str) -> Vec<drum_history::Model> {
        let drum = self.drum(drum_number).await;
        history::history_for_drum(self.db.as_ref(), drum.id)
            .await
            .expect("history lookup failed")
    }

    /// Quantity the drum's live usage records have taken off it.
    pub async fn live_deductions(&self, drum_number: &str) -> Decimal {
        let drum = self.drum(drum_number).await;
        usage_ledger::usages_for_drum(self.db.as_ref(), drum.id)
            .await
            .expect("usage lookup failed")
            .iter()
            .map(|usage| usage.deducted())
            .sum()
    }
}

/// Equality within the precision SQLite keeps for decimals.
pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= Decimal::new(1, 6)
}
