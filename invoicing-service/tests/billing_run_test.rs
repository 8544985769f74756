//! Billing run integration tests for invoicing-service.

mod common;

use chrono::{TimeZone, Utc};
use common::{
    create_graduated_charge, create_test_plan, create_test_subscription, TestDb,
};
use invoicing_service::billing::BillingRunner;
use invoicing_service::models::{BillingRunStatus, PlanInterval};
use rust_decimal::Decimal;

fn utc(y: i32, m: u32, d: u32, h: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn billing_run_invoices_only_due_subscriptions() {
    let test = TestDb::spawn().await;
    let runner = BillingRunner::new(test.db.clone());

    let plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    // Anniversary on the 15th: due. Anniversary on the 20th: not due.
    let due = create_test_subscription(&test, &plan, utc(2022, 5, 15, 9)).await;
    let not_due = create_test_subscription(&test, &plan, utc(2022, 5, 20, 9)).await;

    let run = runner.run(utc(2022, 6, 15, 2)).await.unwrap();

    assert_eq!(run.status, BillingRunStatus::Completed.as_str());
    assert_eq!(run.subscriptions_processed, 1);
    assert_eq!(run.subscriptions_succeeded, 1);
    assert_eq!(run.subscriptions_failed, 0);

    let due_invoice = test
        .db
        .get_invoice_by_period(
            due.subscription_id,
            date(2022, 5, 15),
            date(2022, 6, 14),
            date(2022, 6, 14),
        )
        .await
        .unwrap();
    assert!(due_invoice.is_some());

    let fees = test
        .db
        .list_fees(due_invoice.unwrap().invoice_id)
        .await
        .unwrap();
    assert_eq!(fees.len(), 1);

    let other_invoice = test
        .db
        .get_invoice_by_period(
            not_due.subscription_id,
            date(2022, 5, 20),
            date(2022, 6, 14),
            date(2022, 6, 14),
        )
        .await
        .unwrap();
    assert!(other_invoice.is_none());

    test.cleanup().await;
}

#[tokio::test]
async fn billing_run_is_idempotent_across_reruns() {
    let test = TestDb::spawn().await;
    let runner = BillingRunner::new(test.db.clone());

    let plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    let subscription = create_test_subscription(&test, &plan, utc(2022, 5, 15, 9)).await;

    let first = runner.run(utc(2022, 6, 15, 2)).await.unwrap();
    let second = runner.run(utc(2022, 6, 15, 4)).await.unwrap();

    assert_eq!(first.subscriptions_succeeded, 1);
    assert_eq!(second.subscriptions_succeeded, 1);

    // Same resolved period both times: one invoice, one fee set.
    let invoice = test
        .db
        .get_invoice_by_period(
            subscription.subscription_id,
            date(2022, 5, 15),
            date(2022, 6, 14),
            date(2022, 6, 14),
        )
        .await
        .unwrap()
        .expect("Invoice should exist");
    let fees = test.db.list_fees(invoice.invoice_id).await.unwrap();
    assert_eq!(fees.len(), 1);

    test.cleanup().await;
}

#[tokio::test]
async fn billing_run_continues_past_a_failing_subscription() {
    let test = TestDb::spawn().await;
    let runner = BillingRunner::new(test.db.clone());

    let good_plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    let bad_plan = create_test_plan(&test, PlanInterval::Monthly, false, Decimal::ZERO).await;
    // Ranges with a bounded last tier are a configuration error at pricing time.
    let bad_ranges = serde_json::json!({
        "graduated_percentage_ranges": [
            {"from_value": 0, "to_value": 10, "flat_amount": "0", "fixed_amount": "0", "rate": "5"}
        ]
    });
    create_graduated_charge(&test, &bad_plan, "api_calls", bad_ranges).await;

    let good = create_test_subscription(&test, &good_plan, utc(2022, 5, 15, 9)).await;
    let _bad = create_test_subscription(&test, &bad_plan, utc(2022, 5, 15, 9)).await;

    let run = runner.run(utc(2022, 6, 15, 2)).await.unwrap();

    assert_eq!(run.status, BillingRunStatus::Failed.as_str());
    assert_eq!(run.subscriptions_processed, 2);
    assert_eq!(run.subscriptions_succeeded, 1);
    assert_eq!(run.subscriptions_failed, 1);
    assert!(run.error_message.is_some());

    // The healthy subscription was still billed.
    let invoice = test
        .db
        .get_invoice_by_period(
            good.subscription_id,
            date(2022, 5, 15),
            date(2022, 6, 14),
            date(2022, 6, 14),
        )
        .await
        .unwrap();
    assert!(invoice.is_some());

    test.cleanup().await;
}
