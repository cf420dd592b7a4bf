//! In-memory adapters for every storage port.
//!
//! Each store keeps its records behind one `tokio::sync::RwLock`; a
//! conditional transition checks and writes under a single write guard, which
//! is what makes it atomic with respect to concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    AuditEvent, PaymentDraft, PaymentLookup, PaymentStatus, RefundFilter, RefundRequest,
    RefundStatus, RefundUpdate, TransactionRecord, TransitionFields, WebhookDeadLetter,
};
use crate::ports::{
    AppliedTransition, AuditSink, DeadLetterRepository, PageRequest, PaymentRepository,
    RefundRepository, RepositoryError, RepositoryResult,
};

/// A thread-safe in-memory payment store.
#[derive(Default, Clone)]
pub struct InMemoryPaymentRepository {
    records: Arc<RwLock<HashMap<Uuid, TransactionRecord>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn create(&self, draft: PaymentDraft) -> RepositoryResult<TransactionRecord> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.order_id == draft.order_id) {
            return Err(RepositoryError::DuplicateOrderId(draft.order_id));
        }
        if records
            .values()
            .any(|r| r.gateway_order_id == draft.gateway_order_id)
        {
            return Err(RepositoryError::DuplicateOrderId(draft.gateway_order_id));
        }

        let record = TransactionRecord::from_draft(draft);
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, lookup: &PaymentLookup) -> RepositoryResult<TransactionRecord> {
        let records = self.records.read().await;
        let found = match lookup {
            PaymentLookup::Id(id) => records.get(id),
            PaymentLookup::OrderId(order_id) => {
                records.values().find(|r| &r.order_id == order_id)
            }
            PaymentLookup::GatewayOrderId(id) => {
                records.values().find(|r| &r.gateway_order_id == id)
            }
        };
        found
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(lookup.to_string()))
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        next: PaymentStatus,
        fields: &TransitionFields,
    ) -> RepositoryResult<Option<AppliedTransition>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&record.status) {
            return Ok(None);
        }

        let previous = record.status;
        fields.apply_to(record);
        record.status = next;
        record.updated_at = Utc::now();

        Ok(Some(AppliedTransition {
            previous,
            record: record.clone(),
        }))
    }
}

/// A thread-safe in-memory refund request store.
#[derive(Default, Clone)]
pub struct InMemoryRefundRepository {
    requests: Arc<RwLock<HashMap<Uuid, RefundRequest>>>,
}

impl InMemoryRefundRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundRepository for InMemoryRefundRepository {
    async fn insert(&self, request: RefundRequest) -> RepositoryResult<RefundRequest> {
        let mut requests = self.requests.write().await;
        if requests
            .values()
            .any(|r| r.payment_id == request.payment_id && r.status.is_active())
        {
            return Err(RepositoryError::DuplicateActiveRequest(request.payment_id));
        }
        requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<RefundRequest> {
        let requests = self.requests.read().await;
        requests
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("refund request {}", id)))
    }

    async fn find_by_gateway_refund_id(
        &self,
        gateway_refund_id: &str,
    ) -> RepositoryResult<Option<RefundRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|r| r.gateway_refund_id.as_deref() == Some(gateway_refund_id))
            .cloned())
    }

    async fn find_active_for_payment(
        &self,
        payment_id: Uuid,
    ) -> RepositoryResult<Option<RefundRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .find(|r| r.payment_id == payment_id && r.status.is_active())
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[RefundStatus],
        next: RefundStatus,
        update: &RefundUpdate,
    ) -> RepositoryResult<Option<RefundRequest>> {
        let mut requests = self.requests.write().await;
        let Some(request) = requests.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&request.status) {
            return Ok(None);
        }

        if request.admin_response.is_none() {
            request.admin_response = update.admin_response.clone();
        }
        if let Some(refund_id) = &update.gateway_refund_id {
            request.gateway_refund_id = Some(refund_id.clone());
        }
        if let Some(status) = &update.gateway_refund_status {
            request.gateway_refund_status = Some(status.clone());
        }
        if let Some(at) = update.processed_at {
            request.processed_at = Some(at);
        }
        if let Some(reason) = &update.failure_reason {
            request.failure_reason = Some(reason.clone());
        }
        request.status = next;
        request.updated_at = Utc::now();

        Ok(Some(request.clone()))
    }

    async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> RepositoryResult<Vec<RefundRequest>> {
        let requests = self.requests.read().await;
        let mut matching: Vec<RefundRequest> = requests
            .values()
            .filter(|r| filter.matches(r))
            .filter(|r| match page.after {
                Some(after) => (r.created_at, r.id) < after,
                None => true,
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        matching.truncate(page.limit.max(0) as usize);
        Ok(matching)
    }

    async fn list_in_status_updated_before(
        &self,
        status: RefundStatus,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<RefundRequest>> {
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|r| r.status == status && r.updated_at < updated_before)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> RepositoryResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_for_target(
        &self,
        target_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.target_id == target_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryDeadLetterRepository {
    letters: Arc<RwLock<Vec<WebhookDeadLetter>>>,
}

impl InMemoryDeadLetterRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryDeadLetterRepository {
    async fn record(&self, letter: WebhookDeadLetter) -> RepositoryResult<()> {
        self.letters.write().await.push(letter);
        Ok(())
    }

    async fn list(&self, limit: i64) -> RepositoryResult<Vec<WebhookDeadLetter>> {
        let letters = self.letters.read().await;
        Ok(letters
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
