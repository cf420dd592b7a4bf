//! Human-reviewed refund requests.
//!
//! ```text
//! pending --approve--> approved --gateway accepted--> processing --success--> processed
//!    |                     |                              |
//!    +--reject--> rejected +--gateway rejected--> failed <+--failure
//! ```
//!
//! A payment only reaches `refunded` from `reconcile_gateway_outcome` with a
//! confirmed success. That path touches two records in sequence: the payment
//! first, then the request. The payment step is idempotent on the gateway
//! refund id, so a run interrupted between the two is finished by re-driving
//! it (see `ReconciliationService::repair`).

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::config::settings::SettingsStore;
use crate::domain::audit::TARGET_REFUND_REQUEST;
use crate::domain::{
    Actor, AdminResponse, AnomalyKind, AuditEvent, GatewayRefundOutcome, Notification,
    PaymentLookup, PaymentStatus, RefundDraft, RefundRequest, RefundStatus, RefundUpdate,
    ReviewAction, TransitionRequest,
};
use crate::ports::{
    AuditSink, GatewayClient, GatewayRefund, PaymentRepository, RefundRepository,
    RepositoryError,
};
use crate::services::emit_audit;
use crate::services::notifier::NotificationDispatcher;
use crate::services::transitions::{OutcomeKind, PaymentError, TransitionOutcome, TransitionService};
use crate::validation::{
    sanitize_string, validate_evidence, validate_party_id, validate_positive_amount,
    validate_refund_reason, validate_required, ValidationError,
};

const SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum RefundError {
    #[error("Refund request {0} not found")]
    RequestNotFound(Uuid),

    #[error("Payment {payment_id} is {status}, refunds require a captured payment")]
    PaymentNotCaptured {
        payment_id: Uuid,
        status: PaymentStatus,
    },

    #[error("Payment {0} already has an active refund request")]
    DuplicateActiveRequest(Uuid),

    #[error("Refund amount {requested} exceeds payment amount {available}")]
    AmountExceedsPayment { requested: i64, available: i64 },

    #[error("Requester is not a party to this payment")]
    NotAParty,

    #[error("Cannot {action} refund request {id} in status {status}")]
    InvalidStatus {
        id: Uuid,
        status: RefundStatus,
        action: &'static str,
    },

    #[error("Gateway refund failed for request {request_id}: {reason}")]
    GatewayRefundFailed { request_id: Uuid, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for RefundError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::DuplicateActiveRequest(payment_id) => {
                RefundError::DuplicateActiveRequest(payment_id)
            }
            other => RefundError::Repository(other),
        }
    }
}

/// Result of feeding a gateway refund outcome into the workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub outcome: OutcomeKind,
    pub request: RefundRequest,
    pub anomaly: Option<AnomalyKind>,
}

impl Reconciled {
    fn new(outcome: OutcomeKind, request: RefundRequest) -> Self {
        Self {
            outcome,
            request,
            anomaly: None,
        }
    }

    fn flagged(kind: AnomalyKind, request: RefundRequest) -> Self {
        Self {
            outcome: OutcomeKind::Anomaly,
            request,
            anomaly: Some(kind),
        }
    }
}

pub struct RefundWorkflow {
    payments: Arc<dyn PaymentRepository>,
    refunds: Arc<dyn RefundRepository>,
    gateway: Arc<dyn GatewayClient>,
    transitions: Arc<TransitionService>,
    audit: Arc<dyn AuditSink>,
    notifications: NotificationDispatcher,
    settings: Arc<SettingsStore>,
}

impl RefundWorkflow {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        refunds: Arc<dyn RefundRepository>,
        gateway: Arc<dyn GatewayClient>,
        transitions: Arc<TransitionService>,
        audit: Arc<dyn AuditSink>,
        notifications: NotificationDispatcher,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            payments,
            refunds,
            gateway,
            transitions,
            audit,
            notifications,
            settings,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<RefundRequest, RefundError> {
        match self.refunds.get(id).await {
            Ok(request) => Ok(request),
            Err(RepositoryError::NotFound(_)) => Err(RefundError::RequestNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens a `pending` request against a captured payment.
    pub async fn open(&self, mut draft: RefundDraft) -> Result<RefundRequest, RefundError> {
        let settings = self.settings.current();
        draft.reason = sanitize_string(&draft.reason);
        validate_positive_amount(draft.amount)?;
        validate_party_id("requested_by.id", &draft.requested_by.id)?;
        validate_refund_reason(&draft.reason, &settings)?;
        validate_evidence(&draft.evidence, &settings)?;

        let payment = self
            .payments
            .get(&PaymentLookup::Id(draft.payment_id))
            .await
            .map_err(PaymentError::from)?;

        if !payment.involves(&draft.requested_by) {
            return Err(RefundError::NotAParty);
        }
        if payment.status != PaymentStatus::Captured {
            return Err(RefundError::PaymentNotCaptured {
                payment_id: payment.id,
                status: payment.status,
            });
        }
        if draft.amount > payment.amount {
            return Err(RefundError::AmountExceedsPayment {
                requested: draft.amount,
                available: payment.amount,
            });
        }
        if self.refunds.find_active_for_payment(payment.id).await?.is_some() {
            return Err(RefundError::DuplicateActiveRequest(payment.id));
        }

        let actor = Actor::from(&draft.requested_by);
        let request = self.refunds.insert(RefundRequest::from_draft(draft)).await?;

        tracing::info!(
            refund_request_id = %request.id,
            payment_id = %request.payment_id,
            amount = request.amount,
            "Refund request opened"
        );

        let event = AuditEvent::new(actor, "refund_request.open", TARGET_REFUND_REQUEST, request.id)
            .with_details(json!({
                "payment_id": request.payment_id,
                "amount": request.amount,
                "evidence_items": request.evidence.len(),
            }));
        emit_audit(self.audit.as_ref(), event).await;

        self.notifications.dispatch(Notification::RefundRequestOpened {
            refund_request_id: request.id,
            payment_id: request.payment_id,
            amount: request.amount,
        });

        Ok(request)
    }

    /// `pending -> approved`, then asks the gateway for the refund. The
    /// request ends in `processing` if the gateway accepts and in `failed`
    /// otherwise; a failure is also returned to the caller.
    pub async fn approve(
        &self,
        id: Uuid,
        reviewer_id: &str,
        note: Option<String>,
    ) -> Result<RefundRequest, RefundError> {
        validate_required("reviewer_id", reviewer_id)?;
        let response = AdminResponse {
            reviewer_id: reviewer_id.to_string(),
            action: ReviewAction::Approved,
            reason: note,
            responded_at: Utc::now(),
        };
        let actor = Actor::admin(reviewer_id);

        let approved = self
            .move_request(
                id,
                &[RefundStatus::Pending],
                RefundStatus::Approved,
                RefundUpdate {
                    admin_response: Some(response),
                    ..Default::default()
                },
                "approve",
                actor.clone(),
            )
            .await?;

        let payment = match self.payments.get(&PaymentLookup::Id(approved.payment_id)).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::error!(
                    refund_request_id = %approved.id,
                    payment_id = %approved.payment_id,
                    error = %e,
                    "Payment lookup failed after approval"
                );
                self.fail_request(
                    &approved,
                    &[RefundStatus::Approved],
                    format!("payment lookup failed: {}", e),
                    actor,
                )
                .await?;
                return Err(PaymentError::from(e).into());
            }
        };

        let issued = match payment.gateway_payment_id.as_deref() {
            Some(gateway_payment_id) => self
                .gateway
                .issue_refund(gateway_payment_id, approved.amount)
                .await
                .map_err(|e| e.to_string()),
            None => Err("payment has no gateway payment id".to_string()),
        };

        match issued {
            Ok(refund) => {
                tracing::info!(
                    refund_request_id = %approved.id,
                    gateway_refund_id = %refund.id,
                    "Gateway accepted refund"
                );
                self.record_submission(&approved, refund).await
            }
            Err(reason) => {
                tracing::error!(
                    refund_request_id = %approved.id,
                    payment_id = %approved.payment_id,
                    reason = %reason,
                    "Gateway refund call failed"
                );
                self.fail_request(&approved, &[RefundStatus::Approved], reason.clone(), actor)
                    .await?;
                Err(RefundError::GatewayRefundFailed {
                    request_id: id,
                    reason,
                })
            }
        }
    }

    /// `approved -> processing` once the gateway holds the refund. The write
    /// is retried because giving up leaves an issued refund without its id;
    /// a request still `approved` after that is reported by the repair pass.
    async fn record_submission(
        &self,
        approved: &RefundRequest,
        refund: GatewayRefund,
    ) -> Result<RefundRequest, RefundError> {
        let update = RefundUpdate {
            gateway_refund_id: Some(refund.id.clone()),
            gateway_refund_status: Some(refund.status),
            ..Default::default()
        };

        let mut attempt = 1;
        loop {
            let result = self
                .move_request(
                    approved.id,
                    &[RefundStatus::Approved],
                    RefundStatus::Processing,
                    update.clone(),
                    "submit",
                    Actor::gateway(),
                )
                .await;

            match result {
                Err(RefundError::Repository(e)) if attempt < SUBMIT_ATTEMPTS => {
                    tracing::warn!(
                        refund_request_id = %approved.id,
                        gateway_refund_id = %refund.id,
                        attempt,
                        error = %e,
                        "Recording gateway refund failed, retrying"
                    );
                    sleep(SUBMIT_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        refund_request_id = %approved.id,
                        payment_id = %approved.payment_id,
                        gateway_refund_id = %refund.id,
                        error = %e,
                        "Gateway issued refund but the request could not be updated"
                    );
                    return Err(e);
                }
                Ok(processing) => return Ok(processing),
            }
        }
    }

    /// `pending -> rejected`. Terminal.
    pub async fn reject(
        &self,
        id: Uuid,
        reviewer_id: &str,
        reason: String,
    ) -> Result<RefundRequest, RefundError> {
        validate_required("reviewer_id", reviewer_id)?;
        let reason = sanitize_string(&reason);
        validate_required("reason", &reason)?;

        let rejected = self
            .move_request(
                id,
                &[RefundStatus::Pending],
                RefundStatus::Rejected,
                RefundUpdate {
                    admin_response: Some(AdminResponse {
                        reviewer_id: reviewer_id.to_string(),
                        action: ReviewAction::Rejected,
                        reason: Some(reason),
                        responded_at: Utc::now(),
                    }),
                    ..Default::default()
                },
                "reject",
                Actor::admin(reviewer_id),
            )
            .await?;

        self.notifications.dispatch(Notification::RefundRequestRejected {
            refund_request_id: rejected.id,
            payment_id: rejected.payment_id,
        });

        Ok(rejected)
    }

    /// Applies the gateway's final word on an issued refund.
    pub async fn reconcile_gateway_outcome(
        &self,
        id: Uuid,
        outcome: GatewayRefundOutcome,
        actor: Actor,
    ) -> Result<Reconciled, RefundError> {
        let request = self.get(id).await?;
        match outcome {
            GatewayRefundOutcome::Succeeded => self.reconcile_success(request, actor).await,
            GatewayRefundOutcome::Failed { reason } => {
                self.reconcile_failure(request, reason, actor).await
            }
        }
    }

    async fn reconcile_success(
        &self,
        request: RefundRequest,
        actor: Actor,
    ) -> Result<Reconciled, RefundError> {
        match request.status {
            RefundStatus::Processing => {}
            RefundStatus::Processed => {
                return Ok(Reconciled::new(OutcomeKind::Duplicate, request))
            }
            RefundStatus::Failed => {
                self.flag_request_anomaly(
                    AnomalyKind::RefundProcessedAfterFailure,
                    &request,
                    actor,
                )
                .await?;
                return Ok(Reconciled::flagged(
                    AnomalyKind::RefundProcessedAfterFailure,
                    request,
                ));
            }
            status => {
                return Err(RefundError::InvalidStatus {
                    id: request.id,
                    status,
                    action: "process",
                })
            }
        }

        let Some(gateway_refund_id) = request.gateway_refund_id.clone() else {
            return Err(RefundError::InvalidStatus {
                id: request.id,
                status: request.status,
                action: "process",
            });
        };

        let payment_outcome = self
            .transitions
            .apply(
                &PaymentLookup::Id(request.payment_id),
                TransitionRequest::Refund {
                    refund_id: gateway_refund_id,
                    amount: request.amount,
                },
                actor.clone(),
            )
            .await?;

        match payment_outcome {
            TransitionOutcome::Applied(_) | TransitionOutcome::Duplicate(_) => {}
            other => {
                // The payment refused the refund; the request stays in
                // processing for manual reconciliation.
                tracing::error!(
                    refund_request_id = %request.id,
                    payment_id = %request.payment_id,
                    payment_status = %other.record().status,
                    "Payment did not accept confirmed refund"
                );
                let mut reconciled = Reconciled::new(other.kind(), request);
                if let TransitionOutcome::Anomaly { kind, .. } = other {
                    reconciled.anomaly = Some(kind);
                }
                return Ok(reconciled);
            }
        }

        let processed = self
            .refunds
            .transition(
                request.id,
                &[RefundStatus::Processing],
                RefundStatus::Processed,
                &RefundUpdate {
                    gateway_refund_status: Some("processed".to_string()),
                    processed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        match processed {
            Some(processed) => {
                tracing::info!(
                    refund_request_id = %processed.id,
                    payment_id = %processed.payment_id,
                    amount = processed.amount,
                    "Refund processed"
                );
                let event = AuditEvent::new(actor, "refund_request.process", TARGET_REFUND_REQUEST, processed.id)
                    .with_statuses(RefundStatus::Processing, RefundStatus::Processed);
                emit_audit(self.audit.as_ref(), event).await;

                self.notifications.dispatch(Notification::RefundProcessed {
                    refund_request_id: processed.id,
                    payment_id: processed.payment_id,
                    amount: processed.amount,
                });

                Ok(Reconciled::new(OutcomeKind::Applied, processed))
            }
            // A concurrent delivery finished it first.
            None => Ok(Reconciled::new(
                OutcomeKind::Duplicate,
                self.get(request.id).await?,
            )),
        }
    }

    async fn reconcile_failure(
        &self,
        request: RefundRequest,
        reason: String,
        actor: Actor,
    ) -> Result<Reconciled, RefundError> {
        if let Some(failed) = self
            .fail_request(&request, &[RefundStatus::Processing], reason, actor.clone())
            .await?
        {
            return Ok(Reconciled::new(OutcomeKind::Applied, failed));
        }

        let current = self.get(request.id).await?;
        match current.status {
            RefundStatus::Failed => Ok(Reconciled::new(OutcomeKind::Duplicate, current)),
            RefundStatus::Processed => {
                let kind = AnomalyKind::RefundFailedAfterProcessed;
                self.flag_request_anomaly(kind, &current, actor).await?;
                Ok(Reconciled::flagged(kind, current))
            }
            _ => Ok(Reconciled::new(OutcomeKind::Ignored, current)),
        }
    }

    /// Moves the request to `failed`; `None` if it was no longer in `from`.
    async fn fail_request(
        &self,
        request: &RefundRequest,
        from: &[RefundStatus],
        reason: String,
        actor: Actor,
    ) -> Result<Option<RefundRequest>, RefundError> {
        let failed = self
            .refunds
            .transition(
                request.id,
                from,
                RefundStatus::Failed,
                &RefundUpdate {
                    gateway_refund_status: Some("failed".to_string()),
                    failure_reason: Some(reason.clone()),
                    ..Default::default()
                },
            )
            .await?;

        if let Some(failed) = &failed {
            tracing::warn!(
                refund_request_id = %failed.id,
                payment_id = %failed.payment_id,
                reason = %reason,
                "Refund request failed"
            );
            let event = AuditEvent::new(actor, "refund_request.fail", TARGET_REFUND_REQUEST, failed.id)
                .with_statuses(request.status, RefundStatus::Failed)
                .with_details(json!({ "reason": reason }));
            emit_audit(self.audit.as_ref(), event).await;

            self.notifications.dispatch(Notification::RefundFailed {
                refund_request_id: failed.id,
                payment_id: failed.payment_id,
                reason,
            });
        }

        Ok(failed)
    }

    /// Conditional request transition that reports a miss as `InvalidStatus`.
    async fn move_request(
        &self,
        id: Uuid,
        from: &[RefundStatus],
        to: RefundStatus,
        update: RefundUpdate,
        action: &'static str,
        actor: Actor,
    ) -> Result<RefundRequest, RefundError> {
        let before = self.get(id).await?;

        match self.refunds.transition(id, from, to, &update).await? {
            Some(moved) => {
                tracing::info!(
                    refund_request_id = %moved.id,
                    from = %before.status,
                    to = %moved.status,
                    "Refund request transition applied"
                );
                let event = AuditEvent::new(
                    actor,
                    format!("refund_request.{}", action),
                    TARGET_REFUND_REQUEST,
                    moved.id,
                )
                .with_statuses(before.status, moved.status);
                emit_audit(self.audit.as_ref(), event).await;
                Ok(moved)
            }
            None => {
                let current = self.get(id).await?;
                Err(RefundError::InvalidStatus {
                    id,
                    status: current.status,
                    action,
                })
            }
        }
    }

    async fn flag_request_anomaly(
        &self,
        kind: AnomalyKind,
        request: &RefundRequest,
        actor: Actor,
    ) -> Result<(), RefundError> {
        let payment = self
            .payments
            .get(&PaymentLookup::Id(request.payment_id))
            .await
            .map_err(PaymentError::from)?;

        self.transitions
            .flag_anomaly(
                kind,
                &payment,
                json!({
                    "refund_request_id": request.id,
                    "refund_request_status": request.status,
                    "gateway_refund_id": request.gateway_refund_id,
                }),
                actor,
            )
            .await;
        Ok(())
    }
}
