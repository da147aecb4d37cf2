mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::TestLedger;
use drum_ledger::{
    entities::{drum::DrumStatus, drum_history::HistoryAction},
    services::{drum_registry, usage_ledger},
    ServiceError, SyncUsage, UsageMeasurement,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn sync_row(drum_number: &str, line: &str, used: Decimal) -> SyncUsage {
    SyncUsage {
        drum_number: drum_number.to_string(),
        line_details_id: line.to_string(),
        quantity_used: used,
        measurement: UsageMeasurement::Heuristic,
        item_id: None,
        initial_quantity: None,
        sync_connection_id: Some("sheet-7".to_string()),
        usage_date: Utc::now(),
    }
}

#[tokio::test]
async fn first_reference_creates_drum_from_item_size() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(1500), dec!(1500)).await;

    let outcome = ledger
        .coordinator
        .record_sync_usage(SyncUsage {
            item_id: Some(cable.id),
            ..sync_row("DR-S1", "line1", dec!(400))
        })
        .await
        .unwrap();

    let created = outcome.created_drum.expect("drum should be created");
    assert_eq!(created.drum_number, "DR-S1");
    assert_eq!(created.initial_quantity, dec!(1500));
    assert_eq!(created.item_id, Some(cable.id));

    // 400m plus 5% heuristic wastage.
    assert_eq!(ledger.quantity("DR-S1").await, dec!(1080));
    assert_eq!(ledger.stock(cable.id).await, dec!(1080));

    let trail = ledger.history("DR-S1").await;
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].action, HistoryAction::Created);
    assert_eq!(trail[0].sync_connection_id.as_deref(), Some("sheet-7"));
    assert_eq!(trail[1].action, HistoryAction::UsageAdded);
    assert_eq!(trail[1].sync_connection_id.as_deref(), Some("sheet-7"));
    assert_eq!(trail[1].line_details_id.as_deref(), Some("line1"));
}

#[tokio::test]
async fn readings_set_the_wastage() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    let outcome = ledger
        .coordinator
        .record_sync_usage(SyncUsage {
            measurement: UsageMeasurement::WithPoints {
                start: dec!(0),
                end: dec!(130),
            },
            ..sync_row("DR-001", "line1", dec!(120))
        })
        .await
        .unwrap();

    assert!(outcome.created_drum.is_none());
    let applied = outcome.applied.expect("usage should be applied");
    assert_eq!(applied.usage.wastage_calculated, dec!(10));
    assert_eq!(applied.usage.cable_start_point, Some(dec!(0)));
    assert_eq!(applied.usage.cable_end_point, Some(dec!(130)));
    assert_eq!(applied.deduction, dec!(130));
    assert_eq!(ledger.quantity("DR-001").await, dec!(1870));
}

#[tokio::test]
async fn rows_without_readings_use_the_heuristic() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    let outcome = ledger
        .coordinator
        .record_sync_usage(sync_row("DR-001", "line1", dec!(200)))
        .await
        .unwrap();

    let applied = outcome.applied.unwrap();
    assert_eq!(applied.usage.wastage_calculated, dec!(10));
    assert_eq!(applied.usage.cable_start_point, None);
    assert_eq!(ledger.quantity("DR-001").await, dec!(1790));
}

#[tokio::test]
async fn explicit_initial_quantity_wins_over_item_size() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(1500), dec!(1500)).await;

    let outcome = ledger
        .coordinator
        .record_sync_usage(SyncUsage {
            item_id: Some(cable.id),
            initial_quantity: Some(dec!(800)),
            ..sync_row("DR-S2", "line1", dec!(100))
        })
        .await
        .unwrap();

    assert_eq!(outcome.created_drum.unwrap().initial_quantity, dec!(800));
    assert_eq!(ledger.quantity("DR-S2").await, dec!(695));
}

#[tokio::test]
async fn drum_without_item_gets_default_capacity() {
    let ledger = TestLedger::new().await;

    let outcome = ledger
        .coordinator
        .record_sync_usage(sync_row("DR-S3", "line1", dec!(100)))
        .await
        .unwrap();

    let created = outcome.created_drum.unwrap();
    assert_eq!(created.item_id, None);
    assert_eq!(created.initial_quantity, dec!(2000));
    assert_eq!(ledger.quantity("DR-S3").await, dec!(1895));
}

#[tokio::test]
async fn existing_drum_is_not_recreated() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    let outcome = ledger
        .coordinator
        .record_sync_usage(SyncUsage {
            initial_quantity: Some(dec!(50)),
            ..sync_row("DR-001", "line1", dec!(100))
        })
        .await
        .unwrap();

    assert!(outcome.created_drum.is_none());
    let drum = ledger.drum("DR-001").await;
    assert_eq!(drum.initial_quantity, dec!(2000));
    assert_eq!(drum.current_quantity, dec!(1895));
}

#[tokio::test]
async fn reimporting_a_line_replaces_its_usage() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    ledger
        .coordinator
        .record_sync_usage(sync_row("DR-001", "line1", dec!(500)))
        .await
        .unwrap();
    let outcome = ledger
        .coordinator
        .record_sync_usage(sync_row("DR-001", "line1", dec!(500)))
        .await
        .unwrap();

    assert_eq!(outcome.restored.unwrap().amount, dec!(525));
    assert_eq!(ledger.quantity("DR-001").await, dec!(1475));
    assert_eq!(ledger.stock(cable.id).await, dec!(1475));

    let usages = usage_ledger::usages_for_line(ledger.db.as_ref(), "line1")
        .await
        .unwrap();
    assert_eq!(usages.len(), 1);
    assert_eq!(ledger.live_deductions("DR-001").await, dec!(525));
}

#[tokio::test]
async fn insufficient_sync_usage_creates_nothing() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(100), dec!(100)).await;

    let err = ledger
        .coordinator
        .record_sync_usage(SyncUsage {
            item_id: Some(cable.id),
            ..sync_row("DR-S4", "line1", dec!(100))
        })
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock { .. });
    // The drum created for this row is rolled back with it.
    let found = drum_registry::find_by_number(ledger.db.as_ref(), "DR-S4")
        .await
        .unwrap();
    assert!(found.is_none());
    assert_eq!(ledger.stock(cable.id).await, dec!(100));
}

#[tokio::test]
async fn sync_rejects_bad_rows() {
    let ledger = TestLedger::new().await;

    let err = ledger
        .coordinator
        .record_sync_usage(sync_row("DR-001", "line1", dec!(-1)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));

    let err = ledger
        .coordinator
        .record_sync_usage(sync_row("   ", "line1", dec!(10)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = ledger
        .coordinator
        .record_sync_usage(SyncUsage {
            item_id: Some(Uuid::new_v4()),
            ..sync_row("DR-S5", "line1", dec!(10))
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn drum_is_created_only_when_cable_is_used() {
    let ledger = TestLedger::new().await;
    ledger
        .coordinator
        .record_sync_usage(sync_row("DR-S6", "line1", Decimal::ZERO))
        .await
        .unwrap();

    // Zero rows clear the line and never create a drum.
    let found = drum_registry::find_by_number(ledger.db.as_ref(), "DR-S6")
        .await
        .unwrap();
    assert!(found.is_none());

    ledger
        .coordinator
        .record_sync_usage(sync_row("DR-S6", "line1", dec!(10)))
        .await
        .unwrap();
    assert_eq!(ledger.drum("DR-S6").await.status, DrumStatus::Active);
}
