//! Applies transition requests to stored payments.
//!
//! Every status change goes through [`TransitionService::apply`]: the request
//! is validated against the record, turned into a conditional update, and a
//! miss is classified against the record as it stands after the race.
//! Audit events and notifications fire only when the update committed.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::audit::TARGET_PAYMENT;
use crate::domain::{
    Actor, AnomalyKind, AuditEvent, NoMatch, Notification, PaymentLookup, PaymentStatus,
    TransactionRecord, TransitionError, TransitionRequest,
};
use crate::ports::{AppliedTransition, AuditSink, GatewayError, PaymentRepository, RepositoryError};
use crate::services::emit_audit;
use crate::services::notifier::NotificationDispatcher;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("A payment with order id '{0}' already exists")]
    DuplicateOrderId(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for PaymentError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => PaymentError::NotFound(what),
            RepositoryError::DuplicateOrderId(order_id) => PaymentError::DuplicateOrderId(order_id),
            other => PaymentError::Repository(other),
        }
    }
}

/// What happened to a transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(AppliedTransition),
    Duplicate(TransactionRecord),
    Stale(TransactionRecord),
    Anomaly {
        kind: AnomalyKind,
        record: TransactionRecord,
    },
}

impl TransitionOutcome {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            TransitionOutcome::Applied(applied) => &applied.record,
            TransitionOutcome::Duplicate(record)
            | TransitionOutcome::Stale(record)
            | TransitionOutcome::Anomaly { record, .. } => record,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            TransitionOutcome::Applied(_) => OutcomeKind::Applied,
            TransitionOutcome::Duplicate(_) => OutcomeKind::Duplicate,
            TransitionOutcome::Stale(_) => OutcomeKind::Ignored,
            TransitionOutcome::Anomaly { .. } => OutcomeKind::Anomaly,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Coarse outcome reported back to webhook senders and API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Applied,
    Duplicate,
    Ignored,
    Anomaly,
}

pub struct TransitionService {
    payments: Arc<dyn PaymentRepository>,
    audit: Arc<dyn AuditSink>,
    notifications: NotificationDispatcher,
}

impl TransitionService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        audit: Arc<dyn AuditSink>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            payments,
            audit,
            notifications,
        }
    }

    pub async fn apply(
        &self,
        lookup: &PaymentLookup,
        request: TransitionRequest,
        actor: Actor,
    ) -> Result<TransitionOutcome, PaymentError> {
        let record = self.payments.get(lookup).await?;
        request.validate(&record)?;

        let plan = request.plan(Utc::now());
        let applied = self
            .payments
            .apply_transition(record.id, plan.expected, plan.next, &plan.fields)
            .await?;

        match applied {
            Some(applied) => {
                tracing::info!(
                    payment_id = %applied.record.id,
                    order_id = %applied.record.order_id,
                    from = %applied.previous,
                    to = %applied.record.status,
                    action = request.action(),
                    "Payment transition applied"
                );
                self.after_commit(&request, &applied, actor).await;
                Ok(TransitionOutcome::Applied(applied))
            }
            None => {
                // Re-read: the status we saw before the update may already be stale.
                let current = self.payments.get(&PaymentLookup::Id(record.id)).await?;
                Ok(self.classify(&request, current, actor).await)
            }
        }
    }

    async fn classify(
        &self,
        request: &TransitionRequest,
        current: TransactionRecord,
        actor: Actor,
    ) -> TransitionOutcome {
        match request.classify_no_match(&current) {
            NoMatch::Duplicate => {
                tracing::debug!(
                    payment_id = %current.id,
                    status = %current.status,
                    action = request.action(),
                    "Duplicate transition ignored"
                );
                TransitionOutcome::Duplicate(current)
            }
            NoMatch::Stale => {
                tracing::info!(
                    payment_id = %current.id,
                    status = %current.status,
                    action = request.action(),
                    "Stale transition ignored"
                );
                TransitionOutcome::Stale(current)
            }
            NoMatch::Anomaly(kind) => {
                self.flag_anomaly(kind, &current, request_details(request), actor)
                    .await;
                TransitionOutcome::Anomaly {
                    kind,
                    record: current,
                }
            }
        }
    }

    /// Logs and audits an inconsistency between the gateway and the stored
    /// record. Nothing is written to the record itself.
    pub async fn flag_anomaly(
        &self,
        kind: AnomalyKind,
        record: &TransactionRecord,
        details: serde_json::Value,
        actor: Actor,
    ) {
        tracing::warn!(
            anomaly = %kind,
            payment_id = %record.id,
            order_id = %record.order_id,
            status = %record.status,
            details = %details,
            "Gateway anomaly detected"
        );

        let event = AuditEvent::new(actor, format!("anomaly.{}", kind), TARGET_PAYMENT, record.id)
            .with_statuses(record.status, record.status)
            .with_details(details);
        emit_audit(self.audit.as_ref(), event).await;
    }

    async fn after_commit(&self, request: &TransitionRequest, applied: &AppliedTransition, actor: Actor) {
        let record = &applied.record;

        let event = AuditEvent::new(actor, request.action(), TARGET_PAYMENT, record.id)
            .with_statuses(applied.previous, record.status)
            .with_details(request_details(request));
        emit_audit(self.audit.as_ref(), event).await;

        match record.status {
            PaymentStatus::Captured => self.notifications.dispatch(Notification::PaymentCaptured {
                payment_id: record.id,
                order_id: record.order_id.clone(),
                amount: record.amount,
                currency: record.currency.clone(),
                metadata: record.metadata.clone(),
            }),
            PaymentStatus::Failed => self.notifications.dispatch(Notification::PaymentFailed {
                payment_id: record.id,
                order_id: record.order_id.clone(),
                reason: record.failure_reason.clone(),
            }),
            _ => {}
        }
    }
}

fn request_details(request: &TransitionRequest) -> serde_json::Value {
    match request {
        TransitionRequest::BeginCheckout => json!({}),
        TransitionRequest::Authorize { gateway_payment_id } => {
            json!({ "gateway_payment_id": gateway_payment_id })
        }
        TransitionRequest::Capture { gateway_payment_id } => {
            json!({ "gateway_payment_id": gateway_payment_id })
        }
        TransitionRequest::Fail {
            gateway_payment_id,
            reason,
        } => json!({ "gateway_payment_id": gateway_payment_id, "reason": reason }),
        TransitionRequest::Refund { refund_id, amount } => {
            json!({ "refund_id": refund_id, "amount": amount })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryAuditSink, InMemoryPaymentRepository};
    use crate::domain::{Party, PartyKind, PaymentDraft, PaymentPurpose};
    use crate::services::notifier::LogNotifier;
    use std::collections::BTreeMap;

    struct Fixture {
        service: TransitionService,
        payments: InMemoryPaymentRepository,
        audit: InMemoryAuditSink,
    }

    fn fixture() -> Fixture {
        let payments = InMemoryPaymentRepository::new();
        let audit = InMemoryAuditSink::new();
        let service = TransitionService::new(
            Arc::new(payments.clone()),
            Arc::new(audit.clone()),
            NotificationDispatcher::new(Arc::new(LogNotifier)),
        );
        Fixture {
            service,
            payments,
            audit,
        }
    }

    async fn seed(payments: &InMemoryPaymentRepository) -> TransactionRecord {
        payments
            .create(PaymentDraft {
                order_id: "ord_1".to_string(),
                gateway_order_id: "gw_order_1".to_string(),
                amount: 150_000,
                currency: "INR".to_string(),
                payer: Party::new("u1", PartyKind::User),
                recipient: Some(Party::new("a1", PartyKind::Artisan)),
                purpose: PaymentPurpose::Consultation,
                metadata: BTreeMap::new(),
            })
            .await
            .unwrap()
    }

    fn capture(id: &str) -> TransitionRequest {
        TransitionRequest::Capture {
            gateway_payment_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_capture_applies_once() {
        let f = fixture();
        let record = seed(&f.payments).await;
        let lookup = PaymentLookup::Id(record.id);

        let first = f.service.apply(&lookup, capture("p1"), Actor::gateway()).await.unwrap();
        let second = f.service.apply(&lookup, capture("p1"), Actor::gateway()).await.unwrap();

        assert_eq!(first.kind(), OutcomeKind::Applied);
        assert_eq!(second.kind(), OutcomeKind::Duplicate);
        assert_eq!(second.record().status, PaymentStatus::Captured);
        assert_eq!(f.audit.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_capture_is_audited_not_applied() {
        let f = fixture();
        let record = seed(&f.payments).await;
        let lookup = PaymentLookup::Id(record.id);

        f.service.apply(&lookup, capture("p1"), Actor::gateway()).await.unwrap();
        let outcome = f.service.apply(&lookup, capture("p2"), Actor::gateway()).await.unwrap();

        match outcome {
            TransitionOutcome::Anomaly { kind, record } => {
                assert_eq!(kind, AnomalyKind::ConflictingCapture);
                assert_eq!(record.gateway_payment_id.as_deref(), Some("p1"));
            }
            other => panic!("expected anomaly, got {:?}", other),
        }

        let events = f.audit.all().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].action, "anomaly.conflicting_capture");
    }

    #[tokio::test]
    async fn test_failure_after_capture_does_not_resurrect() {
        let f = fixture();
        let record = seed(&f.payments).await;
        let lookup = PaymentLookup::Id(record.id);

        f.service.apply(&lookup, capture("p1"), Actor::gateway()).await.unwrap();
        let outcome = f
            .service
            .apply(
                &lookup,
                TransitionRequest::Fail {
                    gateway_payment_id: Some("p1".to_string()),
                    reason: Some("timeout".to_string()),
                },
                Actor::gateway(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.kind(), OutcomeKind::Anomaly);
        let stored = f.payments.get(&lookup).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Captured);
        assert!(stored.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_authorize_after_capture_is_stale() {
        let f = fixture();
        let record = seed(&f.payments).await;
        let lookup = PaymentLookup::Id(record.id);

        f.service.apply(&lookup, capture("p1"), Actor::gateway()).await.unwrap();
        let outcome = f
            .service
            .apply(
                &lookup,
                TransitionRequest::Authorize {
                    gateway_payment_id: Some("p1".to_string()),
                },
                Actor::gateway(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.kind(), OutcomeKind::Ignored);
    }

    #[tokio::test]
    async fn test_refund_above_amount_is_rejected_before_update() {
        let f = fixture();
        let record = seed(&f.payments).await;
        let lookup = PaymentLookup::Id(record.id);
        f.service.apply(&lookup, capture("p1"), Actor::gateway()).await.unwrap();

        let err = f
            .service
            .apply(
                &lookup,
                TransitionRequest::Refund {
                    refund_id: "r1".to_string(),
                    amount: 150_001,
                },
                Actor::system(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentError::Transition(TransitionError::RefundExceedsAmount { .. })
        ));
        assert_eq!(f.payments.get(&lookup).await.unwrap().status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn test_unknown_payment_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .apply(
                &PaymentLookup::GatewayOrderId("missing".to_string()),
                capture("p1"),
                Actor::gateway(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::NotFound(_)));
    }
}
