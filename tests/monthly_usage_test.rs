mod common;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use common::TestLedger;
use drum_ledger::{services::monthly_usage, ServiceError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn march() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap()
}

fn february() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 28, 16, 0, 0).unwrap()
}

async fn month_total(ledger: &TestLedger, item_id: Uuid, month: u32, year: i32) -> Option<Decimal> {
    monthly_usage::summary_for(ledger.db.as_ref(), item_id, month, year)
        .await
        .unwrap()
        .map(|summary| summary.total_used)
}

#[tokio::test]
async fn usage_is_bucketed_by_usage_date() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(500), march())
        .await
        .unwrap();
    ledger
        .coordinator
        .apply_usage_at("line2", Some("DR-001"), dec!(100), february())
        .await
        .unwrap();

    assert_eq!(month_total(&ledger, cable.id, 3, 2024).await, Some(dec!(525)));
    assert_eq!(month_total(&ledger, cable.id, 2, 2024).await, Some(dec!(105)));
    assert_eq!(month_total(&ledger, cable.id, 4, 2024).await, None);

    let march_rows = monthly_usage::summaries_for_period(ledger.db.as_ref(), 3, 2024)
        .await
        .unwrap();
    assert_eq!(march_rows.len(), 1);
    assert_eq!(march_rows[0].item_id, cable.id);
}

#[tokio::test]
async fn reassignment_replaces_the_months_share() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(500), march())
        .await
        .unwrap();
    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(300), march())
        .await
        .unwrap();

    assert_eq!(month_total(&ledger, cable.id, 3, 2024).await, Some(dec!(315)));
}

#[tokio::test]
async fn redated_usage_moves_between_months() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(200), february())
        .await
        .unwrap();
    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(200), march())
        .await
        .unwrap();

    assert_eq!(month_total(&ledger, cable.id, 2, 2024).await, Some(Decimal::ZERO));
    assert_eq!(month_total(&ledger, cable.id, 3, 2024).await, Some(dec!(210)));
}

#[tokio::test]
async fn cleared_usage_leaves_nothing_for_the_month() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(500), march())
        .await
        .unwrap();
    ledger
        .coordinator
        .apply_usage_at("line1", None, Decimal::ZERO, march())
        .await
        .unwrap();

    assert_eq!(month_total(&ledger, cable.id, 3, 2024).await, Some(Decimal::ZERO));
}

#[tokio::test]
async fn reset_month_restores_catalog_stock_only() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;
    ledger.drum_for("DR-001", &cable).await;

    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(500), march())
        .await
        .unwrap();
    ledger
        .coordinator
        .apply_usage_at("line2", Some("DR-001"), dec!(100), february())
        .await
        .unwrap();
    ledger
        .coordinator
        .apply_usage_at("line1", Some("DR-001"), dec!(300), march())
        .await
        .unwrap();
    assert_eq!(ledger.stock(cable.id).await, dec!(1580));
    let history_before = ledger.history("DR-001").await;

    let report = ledger.coordinator.reset_month(3, 2024).await.unwrap();

    assert_eq!(report.summaries_cleared, 1);
    assert_eq!(report.total_restored, dec!(315));
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].previous_stock, dec!(1580));
    assert_eq!(report.items[0].new_stock, dec!(1895));
    assert_eq!(ledger.stock(cable.id).await, dec!(1895));

    assert_eq!(month_total(&ledger, cable.id, 3, 2024).await, None);
    assert_eq!(month_total(&ledger, cable.id, 2, 2024).await, Some(dec!(105)));

    // Drums, usages and history are left for recalculation to reconcile.
    assert_eq!(ledger.quantity("DR-001").await, dec!(1580));
    assert_eq!(ledger.live_deductions("DR-001").await, dec!(420));
    assert_eq!(ledger.history("DR-001").await, history_before);

    let recalculated = ledger.coordinator.recalculate_all().await.unwrap();
    assert_eq!(recalculated.adjusted_count(), 0);
    assert_eq!(recalculated.catalog.len(), 1);
    assert_eq!(ledger.stock(cable.id).await, dec!(1580));
}

#[tokio::test]
async fn resetting_an_empty_month_is_harmless() {
    let ledger = TestLedger::new().await;
    let cable = ledger.item("Drop Wire Cable", dec!(2000), dec!(2000)).await;

    let report = ledger.coordinator.reset_month(7, 2023).await.unwrap();

    assert_eq!(report.summaries_cleared, 0);
    assert_eq!(report.total_restored, Decimal::ZERO);
    assert!(report.items.is_empty());
    assert_eq!(ledger.stock(cable.id).await, dec!(2000));
}

#[tokio::test]
async fn reset_month_rejects_bad_periods() {
    let ledger = TestLedger::new().await;

    let err = ledger.coordinator.reset_month(13, 2024).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = ledger.coordinator.reset_month(0, 2024).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
