//! Usage ingestion and aggregation integration tests for invoicing-service.

mod common;

use chrono::{TimeZone, Utc};
use common::{create_test_plan, create_test_subscription, record_units, TestDb};
use invoicing_service::models::PlanInterval;
use rust_decimal::Decimal;

fn utc(y: i32, m: u32, d: u32, h: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn record_usage_event_is_idempotent_on_transaction_id() {
    let test = TestDb::spawn().await;

    let plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    let subscription = create_test_subscription(&test, &plan, utc(2022, 1, 15, 9)).await;

    let first = record_units(
        &test,
        &subscription,
        "api_calls",
        "tx-dup",
        Decimal::from(10),
        utc(2022, 6, 1, 10),
    )
    .await;
    // Replay with different units: the original row wins.
    let second = record_units(
        &test,
        &subscription,
        "api_calls",
        "tx-dup",
        Decimal::from(99),
        utc(2022, 6, 2, 10),
    )
    .await;

    assert_eq!(first.event_id, second.event_id);
    assert_eq!(second.units, Decimal::from(10));

    let aggregation = test
        .db
        .aggregate_usage(
            subscription.subscription_id,
            "api_calls",
            date(2022, 6, 1),
            date(2022, 6, 30),
        )
        .await
        .unwrap();
    assert_eq!(aggregation.units, Decimal::from(10));
    assert_eq!(aggregation.count, 1);

    test.cleanup().await;
}

#[tokio::test]
async fn aggregate_usage_respects_window_and_metric_code() {
    let test = TestDb::spawn().await;

    let plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    let subscription = create_test_subscription(&test, &plan, utc(2022, 1, 15, 9)).await;

    record_units(&test, &subscription, "api_calls", "tx-1", Decimal::from(5), utc(2022, 6, 1, 10)).await;
    record_units(&test, &subscription, "api_calls", "tx-2", Decimal::from(7), utc(2022, 6, 14, 23)).await;
    // Outside the window.
    record_units(&test, &subscription, "api_calls", "tx-3", Decimal::from(100), utc(2022, 6, 15, 0)).await;
    // Different metric.
    record_units(&test, &subscription, "storage_gb", "tx-4", Decimal::from(50), utc(2022, 6, 10, 10)).await;

    let aggregation = test
        .db
        .aggregate_usage(
            subscription.subscription_id,
            "api_calls",
            date(2022, 5, 15),
            date(2022, 6, 14),
        )
        .await
        .unwrap();

    assert_eq!(aggregation.units, Decimal::from(12));
    assert_eq!(aggregation.count, 2);

    test.cleanup().await;
}

#[tokio::test]
async fn aggregate_usage_with_no_events_is_zero() {
    let test = TestDb::spawn().await;

    let plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    let subscription = create_test_subscription(&test, &plan, utc(2022, 1, 15, 9)).await;

    let aggregation = test
        .db
        .aggregate_usage(
            subscription.subscription_id,
            "api_calls",
            date(2022, 5, 15),
            date(2022, 6, 14),
        )
        .await
        .unwrap();

    assert_eq!(aggregation.units, Decimal::ZERO);
    assert_eq!(aggregation.count, 0);

    test.cleanup().await;
}
