//! Ports: the traits the services depend on.
//! Storage adapters live in `crate::adapters`, the gateway in `crate::gateway`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AuditEvent, Notification, PaymentDraft, PaymentLookup, PaymentStatus, RefundFilter,
    RefundRequest, RefundStatus, RefundUpdate, TransactionRecord, TransitionFields,
    WebhookDeadLetter,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate order id: {0}")]
    DuplicateOrderId(String),

    #[error("An active refund request already exists for payment {0}")]
    DuplicateActiveRequest(Uuid),

    #[error("Stored record is invalid: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result of a conditional transition that committed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransition {
    pub previous: PaymentStatus,
    pub record: TransactionRecord,
}

/// Keyset page position: rows strictly older than `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub after: Option<(DateTime<Utc>, Uuid)>,
}

/// Durable store of payment transaction records.
///
/// `apply_transition` is the only way a stored record changes.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, draft: PaymentDraft) -> RepositoryResult<TransactionRecord>;

    async fn get(&self, lookup: &PaymentLookup) -> RepositoryResult<TransactionRecord>;

    /// Moves the record to `next` and writes `fields` only if its status is in
    /// `expected` at the moment of the update. Returns `None` when the
    /// precondition did not hold; nothing is written in that case.
    async fn apply_transition(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        next: PaymentStatus,
        fields: &TransitionFields,
    ) -> RepositoryResult<Option<AppliedTransition>>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    /// Fails with `DuplicateActiveRequest` if the payment already has a
    /// pending, approved or processing request.
    async fn insert(&self, request: RefundRequest) -> RepositoryResult<RefundRequest>;

    async fn get(&self, id: Uuid) -> RepositoryResult<RefundRequest>;

    async fn find_by_gateway_refund_id(
        &self,
        gateway_refund_id: &str,
    ) -> RepositoryResult<Option<RefundRequest>>;

    async fn find_active_for_payment(
        &self,
        payment_id: Uuid,
    ) -> RepositoryResult<Option<RefundRequest>>;

    /// Conditional status change, same contract as
    /// `PaymentRepository::apply_transition`.
    async fn transition(
        &self,
        id: Uuid,
        expected: &[RefundStatus],
        next: RefundStatus,
        update: &RefundUpdate,
    ) -> RepositoryResult<Option<RefundRequest>>;

    /// Newest first.
    async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> RepositoryResult<Vec<RefundRequest>>;

    async fn list_in_status_updated_before(
        &self,
        status: RefundStatus,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<RefundRequest>>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> RepositoryResult<()>;

    async fn list_for_target(&self, target_id: Uuid, limit: i64)
        -> RepositoryResult<Vec<AuditEvent>>;
}

#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn record(&self, letter: WebhookDeadLetter) -> RepositoryResult<()>;

    async fn list(&self, limit: i64) -> RepositoryResult<Vec<WebhookDeadLetter>>;
}

/// Source of runtime settings, read at startup and on explicit reload.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> RepositoryResult<HashMap<String, String>>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),

    #[error("Gateway circuit breaker open")]
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrder {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRefund {
    pub id: String,
    pub status: String,
}

/// Outbound calls to the payment gateway.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Returns the gateway order id.
    async fn create_order(&self, order: &CreateOrder) -> Result<String, GatewayError>;

    async fn issue_refund(
        &self,
        gateway_payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError>;

    /// "closed" or "open".
    fn circuit_state(&self) -> String {
        "closed".to_string()
    }
}

/// Verifies the signature the gateway attaches to callbacks.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, body: &[u8], signature: Option<&str>) -> bool;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}
