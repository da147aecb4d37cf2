mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::TestLedger;
use drum_ledger::{
    entities::drum::DrumStatus,
    services::{
        drum_registry,
        usage_ledger::{self, NewUsage},
    },
    ServiceError, UsageMeasurement,
};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn adjust_quantity_derives_status_and_writes_no_history() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    let drum = ledger.drum_for("DR-001", &cable).await;
    let history_before = ledger.history("DR-001").await;

    let (before, after) =
        drum_registry::adjust_quantity(ledger.db.as_ref(), drum.id, dec!(80), None, dec!(100))
            .await
            .unwrap();

    assert_eq!(before.current_quantity, dec!(2000));
    assert_eq!(after.current_quantity, dec!(80));
    assert_eq!(after.status, DrumStatus::Inactive);
    assert_eq!(ledger.history("DR-001").await, history_before);

    let (_, after) = drum_registry::adjust_quantity(
        ledger.db.as_ref(),
        drum.id,
        dec!(80),
        Some(DrumStatus::Maintenance),
        dec!(100),
    )
    .await
    .unwrap();
    assert_eq!(after.status, DrumStatus::Maintenance);

    // An explicit status never keeps cable-less drums out of `empty`.
    let (_, after) = drum_registry::adjust_quantity(
        ledger.db.as_ref(),
        drum.id,
        dec!(0),
        Some(DrumStatus::Active),
        dec!(100),
    )
    .await
    .unwrap();
    assert_eq!(after.status, DrumStatus::Empty);
}

#[tokio::test]
async fn adjust_quantity_rejects_bad_input() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    let drum = ledger.drum_for("DR-001", &cable).await;

    let err = drum_registry::adjust_quantity(ledger.db.as_ref(), drum.id, dec!(-1), None, dec!(100))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity(_));
    assert_eq!(ledger.quantity("DR-001").await, dec!(2000));

    let err =
        drum_registry::adjust_quantity(ledger.db.as_ref(), Uuid::new_v4(), dec!(10), None, dec!(100))
            .await
            .unwrap_err();
    assert_matches!(err, ServiceError::DrumNotFound(_));
}

#[tokio::test]
async fn find_or_create_returns_the_existing_drum() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    let first = ledger.drum_for("DR-001", &cable).await;
    let again = ledger.drum_for("  DR-001 ", &cable).await;

    assert_eq!(first.id, again.id);
    assert_eq!(ledger.history("DR-001").await.len(), 1);
    assert_eq!(drum_registry::list_drums(ledger.db.as_ref()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn low_quantity_listing_skips_empty_drums() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(6000)).await;
    ledger.drum_for("DR-001", &cable).await;
    ledger.drum_for("DR-002", &cable).await;
    ledger.drum_for("DR-003", &cable).await;
    ledger
        .coordinator
        .adjust_quantity_manually("DR-002", dec!(60), None)
        .await
        .unwrap();
    ledger
        .coordinator
        .adjust_quantity_manually("DR-003", dec!(0), None)
        .await
        .unwrap();

    let low = drum_registry::list_low_quantity(ledger.db.as_ref(), dec!(100))
        .await
        .unwrap();

    assert_eq!(low.len(), 1);
    assert_eq!(low[0].drum_number, "DR-002");
    assert_eq!(low[0].status, DrumStatus::Inactive);
    assert_eq!(ledger.drum("DR-003").await.status, DrumStatus::Empty);
}

#[tokio::test]
async fn usage_needs_an_existing_drum() {
    let ledger = TestLedger::new().await;

    let err = usage_ledger::record_usage(
        ledger.db.as_ref(),
        NewUsage {
            drum_id: Uuid::new_v4(),
            line_details_id: "line1".into(),
            quantity_used: dec!(10),
            wastage: dec!(0.5),
            measurement: UsageMeasurement::Heuristic,
            usage_date: Utc::now(),
        },
    )
    .await
    .unwrap_err();
    assert_matches!(err, ServiceError::DrumNotFound(_));

    let err = usage_ledger::remove_usage(ledger.db.as_ref(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn a_line_holds_at_most_one_usage_record() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    let drum = ledger.drum_for("DR-001", &cable).await;
    let usage = |quantity| NewUsage {
        drum_id: drum.id,
        line_details_id: "line1".into(),
        quantity_used: quantity,
        wastage: dec!(0),
        measurement: UsageMeasurement::Heuristic,
        usage_date: Utc::now(),
    };

    usage_ledger::record_usage(ledger.db.as_ref(), usage(dec!(100)))
        .await
        .unwrap();
    // A second writer that missed the first record loses on the index and
    // can retry through the coordinator.
    let err = usage_ledger::record_usage(ledger.db.as_ref(), usage(dec!(50)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::DatabaseError(_));
    assert!(err.into_transaction_failure().is_retryable());

    let usages = usage_ledger::usages_for_line(ledger.db.as_ref(), "line1")
        .await
        .unwrap();
    assert_eq!(usages.len(), 1);
}
