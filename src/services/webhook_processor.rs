//! Gateway callback ingestion.
//!
//! Callbacks are at-least-once and unordered. Each one is verified, resolved
//! to a stored payment by gateway order id, and turned into a transition
//! request; refund callbacks go through the refund workflow instead. Only
//! malformed input, bad signatures and storage failures are reported as
//! errors, so the gateway retries exactly those.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::settings::SettingsStore;
use crate::domain::{
    Actor, AnomalyKind, GatewayRefundOutcome, PaymentLookup, RefundStatus, TransactionRecord,
    TransitionRequest, WebhookDeadLetter,
};
use crate::ports::{
    DeadLetterRepository, PaymentRepository, RefundRepository, RepositoryError, SignatureVerifier,
};
use crate::services::refund_workflow::{RefundError, RefundWorkflow};
use crate::services::transitions::{OutcomeKind, PaymentError, TransitionOutcome, TransitionService};
use crate::utils::sanitize::sanitize_json;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    /// The refund call that produced this id has not been recorded yet.
    #[error("Refund {0} is not recorded yet, retry later")]
    NotYetRecorded(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Refund(#[from] RefundError),

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// Envelope posted by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub gateway_order_id: String,
    #[serde(default)]
    pub gateway_payment_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub refund_id: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentAuthorized,
    PaymentCaptured,
    PaymentFailed,
    RefundProcessed,
    RefundFailed,
}

impl GatewayEvent {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "payment.authorized" => Some(GatewayEvent::PaymentAuthorized),
            "payment.captured" => Some(GatewayEvent::PaymentCaptured),
            "payment.failed" => Some(GatewayEvent::PaymentFailed),
            "refund.processed" => Some(GatewayEvent::RefundProcessed),
            "refund.failed" => Some(GatewayEvent::RefundFailed),
            _ => None,
        }
    }
}

/// Acknowledgement body returned for every 2xx response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub outcome: OutcomeKind,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyKind>,
}

impl WebhookAck {
    fn new(outcome: OutcomeKind, event_type: &str, payment_id: Option<Uuid>) -> Self {
        Self {
            outcome,
            event_type: event_type.to_string(),
            payment_id,
            anomaly: None,
        }
    }

    fn anomaly(kind: AnomalyKind, event_type: &str, payment_id: Uuid) -> Self {
        Self {
            anomaly: Some(kind),
            ..Self::new(OutcomeKind::Anomaly, event_type, Some(payment_id))
        }
    }
}

pub struct WebhookProcessor {
    verifier: Arc<dyn SignatureVerifier>,
    payments: Arc<dyn PaymentRepository>,
    refunds: Arc<dyn RefundRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    transitions: Arc<TransitionService>,
    workflow: Arc<RefundWorkflow>,
    settings: Arc<SettingsStore>,
}

impl WebhookProcessor {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        payments: Arc<dyn PaymentRepository>,
        refunds: Arc<dyn RefundRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        transitions: Arc<TransitionService>,
        workflow: Arc<RefundWorkflow>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            verifier,
            payments,
            refunds,
            dead_letters,
            transitions,
            workflow,
            settings,
        }
    }

    /// Processes one raw callback body.
    pub async fn process(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, WebhookError> {
        if !self.verifier.verify(body, signature) {
            tracing::warn!("Rejected webhook with invalid signature");
            return Err(WebhookError::InvalidSignature);
        }

        let raw: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| WebhookError::Malformed(e.to_string()))?;
        if envelope.gateway_order_id.trim().is_empty() {
            return Err(WebhookError::Malformed("gatewayOrderId is empty".to_string()));
        }

        let Some(event) = GatewayEvent::parse(&envelope.event_type) else {
            tracing::info!(event_type = %envelope.event_type, "Ignoring unknown webhook event type");
            return Ok(WebhookAck::new(OutcomeKind::Ignored, &envelope.event_type, None));
        };

        let lookup = PaymentLookup::GatewayOrderId(envelope.gateway_order_id.clone());
        let payment = match self.payments.get(&lookup).await {
            Ok(payment) => payment,
            Err(RepositoryError::NotFound(_)) => {
                return self.unknown_order(&envelope, raw).await;
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            event_type = %envelope.event_type,
            payment_id = %payment.id,
            status = %payment.status,
            "Processing webhook"
        );

        match event {
            GatewayEvent::PaymentAuthorized => {
                let request = TransitionRequest::Authorize {
                    gateway_payment_id: non_empty(&envelope.gateway_payment_id),
                };
                self.apply(&payment, &envelope, request).await
            }
            GatewayEvent::PaymentCaptured => {
                let gateway_payment_id = non_empty(&envelope.gateway_payment_id).ok_or_else(|| {
                    WebhookError::Malformed("payment.captured requires gatewayPaymentId".to_string())
                })?;
                if let Some(amount) = envelope.amount.filter(|a| *a != payment.amount) {
                    tracing::warn!(
                        payment_id = %payment.id,
                        expected = payment.amount,
                        reported = amount,
                        "Captured amount differs from payment amount"
                    );
                }
                let request = TransitionRequest::Capture { gateway_payment_id };
                self.apply(&payment, &envelope, request).await
            }
            GatewayEvent::PaymentFailed => {
                let request = TransitionRequest::Fail {
                    gateway_payment_id: non_empty(&envelope.gateway_payment_id),
                    reason: non_empty(&envelope.error_description),
                };
                self.apply(&payment, &envelope, request).await
            }
            GatewayEvent::RefundProcessed => {
                self.route_refund(&payment, &envelope, GatewayRefundOutcome::Succeeded)
                    .await
            }
            GatewayEvent::RefundFailed => {
                let reason = non_empty(&envelope.error_description)
                    .unwrap_or_else(|| "refund failed at gateway".to_string());
                self.route_refund(&payment, &envelope, GatewayRefundOutcome::Failed { reason })
                    .await
            }
        }
    }

    async fn apply(
        &self,
        payment: &TransactionRecord,
        envelope: &WebhookEnvelope,
        request: TransitionRequest,
    ) -> Result<WebhookAck, WebhookError> {
        let outcome = self
            .transitions
            .apply(&PaymentLookup::Id(payment.id), request, Actor::gateway())
            .await?;

        let mut ack = WebhookAck::new(outcome.kind(), &envelope.event_type, Some(payment.id));
        if let TransitionOutcome::Anomaly { kind, .. } = outcome {
            ack.anomaly = Some(kind);
        }
        Ok(ack)
    }

    async fn route_refund(
        &self,
        payment: &TransactionRecord,
        envelope: &WebhookEnvelope,
        outcome: GatewayRefundOutcome,
    ) -> Result<WebhookAck, WebhookError> {
        let refund_id = non_empty(&envelope.refund_id).ok_or_else(|| {
            WebhookError::Malformed(format!("{} requires refundId", envelope.event_type))
        })?;

        match self.refunds.find_by_gateway_refund_id(&refund_id).await? {
            Some(request) if request.payment_id == payment.id => {
                match self
                    .workflow
                    .reconcile_gateway_outcome(request.id, outcome, Actor::gateway())
                    .await
                {
                    Ok(reconciled) => {
                        let mut ack = WebhookAck::new(
                            reconciled.outcome,
                            &envelope.event_type,
                            Some(payment.id),
                        );
                        ack.anomaly = reconciled.anomaly;
                        Ok(ack)
                    }
                    Err(RefundError::InvalidStatus { id, status, .. }) => {
                        tracing::info!(
                            refund_request_id = %id,
                            status = %status,
                            "Refund callback does not apply to request status"
                        );
                        Ok(WebhookAck::new(
                            OutcomeKind::Ignored,
                            &envelope.event_type,
                            Some(payment.id),
                        ))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Some(_) => self.unknown_refund(payment, envelope, &refund_id).await,
            None => {
                let active = self.refunds.find_active_for_payment(payment.id).await?;
                match active {
                    Some(request) if request.status == RefundStatus::Approved => {
                        tracing::info!(
                            refund_request_id = %request.id,
                            gateway_refund_id = %refund_id,
                            "Refund callback arrived before the refund id was recorded"
                        );
                        Err(WebhookError::NotYetRecorded(refund_id))
                    }
                    _ => self.unknown_refund(payment, envelope, &refund_id).await,
                }
            }
        }
    }

    async fn unknown_refund(
        &self,
        payment: &TransactionRecord,
        envelope: &WebhookEnvelope,
        refund_id: &str,
    ) -> Result<WebhookAck, WebhookError> {
        self.transitions
            .flag_anomaly(
                AnomalyKind::UnknownRefund,
                payment,
                json!({ "event_type": envelope.event_type, "refund_id": refund_id }),
                Actor::gateway(),
            )
            .await;
        Ok(WebhookAck::anomaly(
            AnomalyKind::UnknownRefund,
            &envelope.event_type,
            payment.id,
        ))
    }

    async fn unknown_order(
        &self,
        envelope: &WebhookEnvelope,
        raw: serde_json::Value,
    ) -> Result<WebhookAck, WebhookError> {
        tracing::warn!(
            event_type = %envelope.event_type,
            gateway_order_id = %envelope.gateway_order_id,
            "Webhook for unknown gateway order"
        );

        if self.settings.current().dead_letter_unknown_orders {
            let letter = WebhookDeadLetter::new(
                envelope.event_type.clone(),
                envelope.gateway_order_id.clone(),
                sanitize_json(&raw),
                "unknown gateway order id",
            );
            self.dead_letters.record(letter).await?;
        }

        Ok(WebhookAck::new(OutcomeKind::Ignored, &envelope.event_type, None))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
