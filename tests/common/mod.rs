#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payflow_core::adapters::{
    InMemoryAuditSink, InMemoryDeadLetterRepository, InMemoryPaymentRepository,
    InMemoryRefundRepository,
};
use payflow_core::config::settings::{RuntimeSettings, SettingsStore};
use payflow_core::domain::{
    Evidence, Notification, Party, PartyKind, PaymentPurpose, RefundDraft, RefundFilter,
    RefundRequest, RefundStatus, RefundUpdate, TransactionRecord,
};
use payflow_core::gateway::HmacSignatureVerifier;
use payflow_core::ports::{
    CreateOrder, GatewayClient, GatewayError, GatewayRefund, Notifier, PageRequest,
    RefundRepository, RepositoryError, RepositoryResult,
};
use uuid::Uuid;
use payflow_core::services::{NewPayment, WebhookAck, WebhookError};
use payflow_core::{AppState, Dependencies};

pub const WEBHOOK_SECRET: &str = "whsec_test_0123456789";
pub const ADMIN_KEY: &str = "admin-key-0123456789";

/// Gateway double: hands out sequential ids and records refund calls.
#[derive(Default)]
pub struct StubGateway {
    orders: AtomicUsize,
    refunds: AtomicUsize,
    fail_refunds: AtomicBool,
    pub refund_calls: Mutex<Vec<(String, i64)>>,
}

impl StubGateway {
    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn refund_call_count(&self) -> usize {
        self.refund_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GatewayClient for StubGateway {
    async fn create_order(&self, _order: &CreateOrder) -> Result<String, GatewayError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("order_gw_{}", n))
    }

    async fn issue_refund(
        &self,
        gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        self.refund_calls
            .lock()
            .unwrap()
            .push((gateway_payment_id.to_string(), amount));

        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("connection reset".to_string()));
        }

        let n = self.refunds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayRefund {
            id: format!("r{}", n),
            status: "pending".to_string(),
        })
    }
}

/// In-memory refund store whose next `n` writes to `processing` fail.
#[derive(Default)]
pub struct FlakyRefundRepository {
    inner: InMemoryRefundRepository,
    processing_failures: AtomicUsize,
}

impl FlakyRefundRepository {
    pub fn new(inner: InMemoryRefundRepository) -> Self {
        Self {
            inner,
            processing_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_processing_writes(&self, n: usize) {
        self.processing_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl RefundRepository for FlakyRefundRepository {
    async fn insert(&self, request: RefundRequest) -> RepositoryResult<RefundRequest> {
        self.inner.insert(request).await
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<RefundRequest> {
        self.inner.get(id).await
    }

    async fn find_by_gateway_refund_id(
        &self,
        gateway_refund_id: &str,
    ) -> RepositoryResult<Option<RefundRequest>> {
        self.inner.find_by_gateway_refund_id(gateway_refund_id).await
    }

    async fn find_active_for_payment(
        &self,
        payment_id: Uuid,
    ) -> RepositoryResult<Option<RefundRequest>> {
        self.inner.find_active_for_payment(payment_id).await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[RefundStatus],
        next: RefundStatus,
        update: &RefundUpdate,
    ) -> RepositoryResult<Option<RefundRequest>> {
        if next == RefundStatus::Processing {
            let failing = self
                .processing_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RepositoryError::Database("connection reset".to_string()));
            }
        }
        self.inner.transition(id, expected, next, update).await
    }

    async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> RepositoryResult<Vec<RefundRequest>> {
        self.inner.list(filter, page).await
    }

    async fn list_in_status_updated_before(
        &self,
        status: RefundStatus,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<RefundRequest>> {
        self.inner
            .list_in_status_updated_before(status, updated_before)
            .await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|n| n.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// A fully wired service graph over the in-memory adapters.
pub struct TestApp {
    pub state: AppState,
    pub payments: InMemoryPaymentRepository,
    pub refunds: InMemoryRefundRepository,
    pub refund_store: Arc<FlakyRefundRepository>,
    pub audit: InMemoryAuditSink,
    pub dead_letters: InMemoryDeadLetterRepository,
    pub gateway: Arc<StubGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub signer: HmacSignatureVerifier,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(RuntimeSettings::default())
    }

    pub fn with_settings(settings: RuntimeSettings) -> Self {
        let payments = InMemoryPaymentRepository::new();
        let refunds = InMemoryRefundRepository::new();
        let audit = InMemoryAuditSink::new();
        let dead_letters = InMemoryDeadLetterRepository::new();
        let gateway = Arc::new(StubGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let refund_store = Arc::new(FlakyRefundRepository::new(refunds.clone()));

        let state = AppState::from_dependencies(Dependencies {
            payments: Arc::new(payments.clone()),
            refunds: refund_store.clone(),
            audit: Arc::new(audit.clone()),
            dead_letters: Arc::new(dead_letters.clone()),
            gateway: gateway.clone(),
            verifier: Arc::new(HmacSignatureVerifier::new(WEBHOOK_SECRET)),
            notifier: notifier.clone(),
            settings: Arc::new(SettingsStore::fixed(settings)),
            default_currency: "INR".to_string(),
            admin_api_key: ADMIN_KEY.to_string(),
            health_checkers: Vec::new(),
        });

        Self {
            state,
            payments,
            refunds,
            refund_store,
            audit,
            dead_letters,
            gateway,
            notifier,
            signer: HmacSignatureVerifier::new(WEBHOOK_SECRET),
        }
    }

    pub async fn create_payment(&self, order_id: &str, amount: i64) -> TransactionRecord {
        self.state
            .payments
            .create(NewPayment {
                order_id: order_id.to_string(),
                amount,
                currency: None,
                payer: payer(),
                recipient: Some(recipient()),
                purpose: PaymentPurpose::Consultation,
                metadata: BTreeMap::from([("booking_id".to_string(), "bk_1".to_string())]),
            })
            .await
            .unwrap()
    }

    /// A payment the gateway has already captured as `pay_<order_id>`.
    pub async fn captured_payment(&self, order_id: &str, amount: i64) -> TransactionRecord {
        let payment = self.create_payment(order_id, amount).await;
        let gateway_payment_id = format!("pay_{}", order_id);
        self.webhook(capture_event(&payment.gateway_order_id, &gateway_payment_id))
            .await
            .unwrap();
        self.state
            .payments
            .get(&payflow_core::domain::PaymentLookup::Id(payment.id))
            .await
            .unwrap()
    }

    pub async fn open_refund(&self, payment: &TransactionRecord, amount: i64) -> RefundRequest {
        self.state
            .refunds
            .open(refund_draft(payment, amount))
            .await
            .unwrap()
    }

    pub async fn webhook(&self, event: Value) -> Result<WebhookAck, WebhookError> {
        let body = serde_json::to_vec(&event).unwrap();
        let signature = self.signer.sign(&body);
        self.state.webhooks.process(&body, Some(&signature)).await
    }
}

pub fn payer() -> Party {
    Party::new("user_1", PartyKind::User)
}

pub fn recipient() -> Party {
    Party::new("artisan_1", PartyKind::Artisan)
}

pub fn refund_draft(payment: &TransactionRecord, amount: i64) -> RefundDraft {
    RefundDraft {
        payment_id: payment.id,
        booking_id: Some("bk_1".to_string()),
        requested_by: payer(),
        amount,
        reason: "The artisan did not show up for the session".to_string(),
        evidence: vec![Evidence {
            kind: "screenshot".to_string(),
            url: "https://cdn.example.com/evidence/1.png".to_string(),
            description: None,
        }],
    }
}

pub fn capture_event(gateway_order_id: &str, gateway_payment_id: &str) -> Value {
    json!({
        "type": "payment.captured",
        "gatewayOrderId": gateway_order_id,
        "gatewayPaymentId": gateway_payment_id,
    })
}

pub fn refund_event(event_type: &str, gateway_order_id: &str, refund_id: &str) -> Value {
    json!({
        "type": event_type,
        "gatewayOrderId": gateway_order_id,
        "refundId": refund_id,
    })
}

/// Lets spawned notification deliveries run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
