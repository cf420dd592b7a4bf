mod common;

use common::{capture_event, refund_event, settle, TestApp};
use futures::future::join_all;
use serde_json::json;

use payflow_core::config::settings::RuntimeSettings;
use payflow_core::domain::{
    AnomalyKind, PaymentLookup, PaymentStatus, RefundStatus, RefundUpdate,
};
use payflow_core::ports::{DeadLetterRepository, RefundRepository};
use payflow_core::services::{OutcomeKind, WebhookError};

#[tokio::test]
async fn test_duplicate_captures_commit_once() {
    let app = TestApp::new();
    let payment = app.create_payment("ord_dup", 50_000).await;

    let deliveries = (0..5).map(|_| app.webhook(capture_event(&payment.gateway_order_id, "p1")));
    let acks: Vec<_> = join_all(deliveries)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let applied = acks.iter().filter(|a| a.outcome == OutcomeKind::Applied).count();
    let duplicates = acks.iter().filter(|a| a.outcome == OutcomeKind::Duplicate).count();
    assert_eq!(applied, 1);
    assert_eq!(duplicates, 4);

    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("p1"));

    settle().await;
    assert_eq!(app.notifier.count("payment_captured"), 1);
    let captures = app
        .audit
        .all()
        .await
        .into_iter()
        .filter(|e| e.action == "payment.capture")
        .count();
    assert_eq!(captures, 1);
}

#[tokio::test]
async fn test_failure_after_capture_does_not_resurrect() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_late", 10_000).await;

    let ack = app
        .webhook(json!({
            "type": "payment.failed",
            "gatewayOrderId": payment.gateway_order_id,
            "gatewayPaymentId": "pay_ord_late",
            "errorDescription": "bank declined",
        }))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Anomaly);
    assert_eq!(ack.anomaly, Some(AnomalyKind::LateFailure));

    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
    assert!(stored.failure_reason.is_none());

    let audit = app.audit.all().await;
    assert!(audit.iter().any(|e| e.action == "anomaly.late_failure"));

    settle().await;
    assert_eq!(app.notifier.count("payment_failed"), 0);
}

#[tokio::test]
async fn test_concurrent_capture_and_failure_settle_on_one() {
    for round in 0..10 {
        let app = TestApp::new();
        let payment = app.create_payment(&format!("ord_race_{}", round), 10_000).await;

        let (captured, failed) = tokio::join!(
            app.webhook(capture_event(&payment.gateway_order_id, "p1")),
            app.webhook(json!({
                "type": "payment.failed",
                "gatewayOrderId": payment.gateway_order_id,
                "gatewayPaymentId": "p1",
                "errorDescription": "bank declined",
            })),
        );
        let (captured, failed) = (captured.unwrap(), failed.unwrap());
        let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();

        settle().await;
        match (captured.outcome, failed.outcome) {
            (OutcomeKind::Applied, OutcomeKind::Anomaly) => {
                assert_eq!(failed.anomaly, Some(AnomalyKind::LateFailure));
                assert_eq!(stored.status, PaymentStatus::Captured);
                assert_eq!(app.notifier.count("payment_captured"), 1);
                assert_eq!(app.notifier.count("payment_failed"), 0);
            }
            (OutcomeKind::Anomaly, OutcomeKind::Applied) => {
                assert_eq!(captured.anomaly, Some(AnomalyKind::CaptureAfterFailure));
                assert_eq!(stored.status, PaymentStatus::Failed);
                assert_eq!(app.notifier.count("payment_failed"), 1);
                assert_eq!(app.notifier.count("payment_captured"), 0);
            }
            other => panic!("expected exactly one applied event, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_conflicting_capture_keeps_first_payment_id() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_conflict", 10_000).await;

    let ack = app
        .webhook(capture_event(&payment.gateway_order_id, "pay_other"))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Anomaly);
    assert_eq!(ack.anomaly, Some(AnomalyKind::ConflictingCapture));

    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("pay_ord_conflict"));
}

#[tokio::test]
async fn test_capture_after_failure_is_flagged() {
    let app = TestApp::new();
    let payment = app.create_payment("ord_failed", 10_000).await;

    let ack = app
        .webhook(json!({
            "type": "payment.failed",
            "gatewayOrderId": payment.gateway_order_id,
            "errorDescription": "insufficient funds",
        }))
        .await
        .unwrap();
    assert_eq!(ack.outcome, OutcomeKind::Applied);

    let ack = app
        .webhook(capture_event(&payment.gateway_order_id, "p1"))
        .await
        .unwrap();
    assert_eq!(ack.anomaly, Some(AnomalyKind::CaptureAfterFailure));

    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("insufficient funds"));

    settle().await;
    assert_eq!(app.notifier.kinds(), vec!["payment_failed"]);
}

#[tokio::test]
async fn test_authorization_after_capture_is_ignored() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_auth", 10_000).await;

    let ack = app
        .webhook(json!({
            "type": "payment.authorized",
            "gatewayOrderId": payment.gateway_order_id,
            "gatewayPaymentId": "pay_ord_auth",
        }))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Ignored);
    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
}

#[tokio::test]
async fn test_unknown_order_is_dead_lettered() {
    let app = TestApp::new();

    let ack = app
        .webhook(json!({
            "type": "payment.captured",
            "gatewayOrderId": "order_missing",
            "gatewayPaymentId": "p1",
            "email": "someone@example.com",
        }))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Ignored);
    assert!(ack.payment_id.is_none());

    let letters = app.dead_letters.list(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].gateway_order_id, "order_missing");
    assert_eq!(letters[0].payload["email"], "****");
    assert_eq!(letters[0].payload["gatewayPaymentId"], "p1");
}

#[tokio::test]
async fn test_unknown_order_dead_letter_can_be_disabled() {
    let app = TestApp::with_settings(RuntimeSettings {
        dead_letter_unknown_orders: false,
        ..Default::default()
    });

    let ack = app
        .webhook(capture_event("order_missing", "p1"))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Ignored);
    assert!(app.dead_letters.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let app = TestApp::new();
    let payment = app.create_payment("ord_dispute", 10_000).await;

    let ack = app
        .webhook(json!({
            "type": "payment.dispute.created",
            "gatewayOrderId": payment.gateway_order_id,
        }))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Ignored);
    assert_eq!(ack.event_type, "payment.dispute.created");
}

#[tokio::test]
async fn test_rejects_bad_signature_and_malformed_body() {
    let app = TestApp::new();
    let body = serde_json::to_vec(&capture_event("order_gw_1", "p1")).unwrap();

    let err = app
        .state
        .webhooks
        .process(&body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::InvalidSignature));

    let err = app.state.webhooks.process(&body, None).await.unwrap_err();
    assert!(matches!(err, WebhookError::InvalidSignature));

    let garbage = b"{not json";
    let signature = app.signer.sign(garbage);
    let err = app
        .state
        .webhooks
        .process(garbage, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::Malformed(_)));
}

#[tokio::test]
async fn test_capture_without_payment_id_is_malformed() {
    let app = TestApp::new();
    let payment = app.create_payment("ord_nopay", 10_000).await;

    let err = app
        .webhook(json!({
            "type": "payment.captured",
            "gatewayOrderId": payment.gateway_order_id,
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookError::Malformed(_)));
}

#[tokio::test]
async fn test_refund_event_for_unknown_refund_is_anomaly() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_unknown_refund", 10_000).await;

    let ack = app
        .webhook(refund_event("refund.processed", &payment.gateway_order_id, "r_foreign"))
        .await
        .unwrap();

    assert_eq!(ack.outcome, OutcomeKind::Anomaly);
    assert_eq!(ack.anomaly, Some(AnomalyKind::UnknownRefund));

    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
    assert!(stored.refund_id.is_none());
}

#[tokio::test]
async fn test_refund_event_before_refund_id_recorded_is_retryable() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_inflight", 10_000).await;
    let request = app.open_refund(&payment, 10_000).await;

    // Approved but the gateway call has not returned yet.
    app.refunds
        .transition(
            request.id,
            &[RefundStatus::Pending],
            RefundStatus::Approved,
            &RefundUpdate::default(),
        )
        .await
        .unwrap()
        .unwrap();

    let err = app
        .webhook(refund_event("refund.processed", &payment.gateway_order_id, "r_early"))
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::NotYetRecorded(ref id) if id == "r_early"));

    let stored = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
}

#[tokio::test]
async fn test_refund_failed_leaves_payment_captured() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_refund_fail", 10_000).await;
    let request = app.open_refund(&payment, 4_000).await;
    let approved = app.state.refunds.approve(request.id, "admin_1", None).await.unwrap();
    let refund_id = approved.gateway_refund_id.clone().unwrap();

    let ack = app
        .webhook(json!({
            "type": "refund.failed",
            "gatewayOrderId": payment.gateway_order_id,
            "refundId": refund_id,
            "errorDescription": "beneficiary account closed",
        }))
        .await
        .unwrap();
    assert_eq!(ack.outcome, OutcomeKind::Applied);

    let stored = app.state.refunds.get(request.id).await.unwrap();
    assert_eq!(stored.status, RefundStatus::Failed);
    assert_eq!(stored.failure_reason.as_deref(), Some("beneficiary account closed"));

    let payment = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Captured);

    // A success report after the failure is not applied.
    let ack = app
        .webhook(refund_event("refund.processed", &payment.gateway_order_id, &refund_id))
        .await
        .unwrap();
    assert_eq!(ack.outcome, OutcomeKind::Anomaly);
    assert_eq!(ack.anomaly, Some(AnomalyKind::RefundProcessedAfterFailure));
    assert_eq!(
        app.state.refunds.get(request.id).await.unwrap().status,
        RefundStatus::Failed
    );
}

#[tokio::test]
async fn test_refund_failed_after_processed_is_flagged() {
    let app = TestApp::new();
    let payment = app.captured_payment("ord_refund_flip", 10_000).await;
    let request = app.open_refund(&payment, 10_000).await;
    let approved = app.state.refunds.approve(request.id, "admin_1", None).await.unwrap();
    let refund_id = approved.gateway_refund_id.clone().unwrap();

    let ack = app
        .webhook(refund_event("refund.processed", &payment.gateway_order_id, &refund_id))
        .await
        .unwrap();
    assert_eq!(ack.outcome, OutcomeKind::Applied);

    let ack = app
        .webhook(refund_event("refund.failed", &payment.gateway_order_id, &refund_id))
        .await
        .unwrap();
    assert_eq!(ack.outcome, OutcomeKind::Anomaly);
    assert_eq!(ack.anomaly, Some(AnomalyKind::RefundFailedAfterProcessed));

    let stored = app.state.refunds.get(request.id).await.unwrap();
    assert_eq!(stored.status, RefundStatus::Processed);
    let payment = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn test_capture_then_refund_end_to_end() {
    let app = TestApp::new();
    let payment = app.create_payment("ord_150000", 150_000).await;
    assert_eq!(payment.status, PaymentStatus::Created);

    let (first, second) = tokio::join!(
        app.webhook(capture_event(&payment.gateway_order_id, "p1")),
        app.webhook(capture_event(&payment.gateway_order_id, "p1")),
    );
    let mut outcomes = vec![first.unwrap().outcome, second.unwrap().outcome];
    outcomes.sort_by_key(|o| *o != OutcomeKind::Applied);
    assert_eq!(outcomes, vec![OutcomeKind::Applied, OutcomeKind::Duplicate]);

    let captured = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(captured.status, PaymentStatus::Captured);
    assert_eq!(captured.gateway_payment_id.as_deref(), Some("p1"));

    let request = app.open_refund(&captured, 150_000).await;
    let processing = app.state.refunds.approve(request.id, "admin_1", None).await.unwrap();
    assert_eq!(processing.status, RefundStatus::Processing);
    assert_eq!(processing.gateway_refund_id.as_deref(), Some("r1"));
    assert_eq!(
        app.gateway.refund_calls.lock().unwrap().clone(),
        vec![("p1".to_string(), 150_000)]
    );

    let (first, second) = tokio::join!(
        app.webhook(refund_event("refund.processed", &payment.gateway_order_id, "r1")),
        app.webhook(refund_event("refund.processed", &payment.gateway_order_id, "r1")),
    );
    let mut outcomes = vec![first.unwrap().outcome, second.unwrap().outcome];
    outcomes.sort_by_key(|o| *o != OutcomeKind::Applied);
    assert_eq!(outcomes, vec![OutcomeKind::Applied, OutcomeKind::Duplicate]);

    let refunded = app.state.payments.get(&PaymentLookup::Id(payment.id)).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_amount, Some(150_000));
    assert_eq!(refunded.refund_id.as_deref(), Some("r1"));
    assert!(refunded.refunded_at.is_some());

    let processed = app.state.refunds.get(request.id).await.unwrap();
    assert_eq!(processed.status, RefundStatus::Processed);
    assert!(processed.processed_at.is_some());

    // Redelivery long after the fact is still a no-op.
    let ack = app
        .webhook(refund_event("refund.processed", &payment.gateway_order_id, "r1"))
        .await
        .unwrap();
    assert_eq!(ack.outcome, OutcomeKind::Duplicate);

    settle().await;
    assert_eq!(app.notifier.count("payment_captured"), 1);
    assert_eq!(app.notifier.count("refund_processed"), 1);
}
