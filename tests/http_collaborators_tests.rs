mod helpers;

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

use helpers::{owner, wallet};
use smartwill_backend::executor::{
    DistributionExecutor, HttpDistributionExecutor, TransferOutcome, TransferRequest,
};
use smartwill_backend::notify::{EventKind, NotificationSink, Recipient, WebhookNotifier};
use smartwill_backend::WillId;

fn transfer() -> TransferRequest {
    TransferRequest {
        will_id: WillId::new(),
        beneficiary_id: Uuid::new_v4(),
        wallet_address: wallet(100),
        amount: 4_200,
        attempt: 1,
    }
}

#[tokio::test]
async fn test_executor_sends_idempotency_key_and_amount() {
    let server = MockServer::start_async().await;
    let request = transfer();
    let key = request.idempotency_key();

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/transfers")
                .header("idempotency-key", key.as_str())
                .json_body_partial(
                    json!({
                        "wallet_address": wallet(100).as_str(),
                        "amount": 4_200,
                        "attempt": 1
                    })
                    .to_string(),
                );
            then.status(202);
        })
        .await;

    let executor =
        HttpDistributionExecutor::new(server.url("/transfers"), Duration::from_secs(5)).unwrap();
    assert_eq!(executor.transfer(&request).await, TransferOutcome::Success);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_executor_reports_rejections_as_failures() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/transfers");
            then.status(503).body("payout rail down");
        })
        .await;

    let executor =
        HttpDistributionExecutor::new(server.url("/transfers"), Duration::from_secs(5)).unwrap();
    match executor.transfer(&transfer()).await {
        TransferOutcome::Failed(reason) => {
            assert!(reason.contains("503"));
            assert!(reason.contains("payout rail down"));
        }
        TransferOutcome::Success => panic!("a 503 must not count as delivered"),
    }
}

#[tokio::test]
async fn test_executor_unreachable_endpoint_fails_without_panicking() {
    let executor = HttpDistributionExecutor::new(
        "http://127.0.0.1:9/transfers",
        Duration::from_millis(500),
    )
    .unwrap();
    assert!(matches!(
        executor.transfer(&transfer()).await,
        TransferOutcome::Failed(_)
    ));
}

#[tokio::test]
async fn test_webhook_posts_event_and_recipients() {
    let server = MockServer::start_async().await;
    let will_id = WillId::new();

    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/events").json_body_partial(
                json!({
                    "will_id": will_id,
                    "event": "deadline_missed",
                    "recipients": [
                        { "role": "owner", "wallet_address": owner().as_str() }
                    ]
                })
                .to_string(),
            );
            then.status(200);
        })
        .await;

    let notifier = WebhookNotifier::new(server.url("/events"), Duration::from_secs(5)).unwrap();
    let recipients = vec![Recipient::Owner {
        wallet_address: owner(),
    }];
    notifier
        .notify(will_id, EventKind::DeadlineMissed, &recipients)
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_webhook_error_status_is_a_delivery_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/events");
            then.status(500);
        })
        .await;

    let notifier = WebhookNotifier::new(server.url("/events"), Duration::from_secs(5)).unwrap();
    let result = notifier
        .notify(WillId::new(), EventKind::CheckInReminder, &[])
        .await;
    assert!(result.is_err());
}
