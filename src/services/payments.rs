use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::audit::TARGET_PAYMENT;
use crate::domain::{
    Actor, AuditEvent, Party, PaymentDraft, PaymentLookup, PaymentPurpose, TransactionRecord,
    TransitionRequest,
};
use crate::ports::{AuditSink, CreateOrder, GatewayClient, PaymentRepository, RepositoryError};
use crate::services::emit_audit;
use crate::services::transitions::{PaymentError, TransitionOutcome, TransitionService};
use crate::validation::{
    sanitize_string, validate_currency, validate_metadata, validate_order_id, validate_party_id,
    validate_positive_amount,
};

/// Caller input for a new payment. The gateway order id is assigned here,
/// not by the caller.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub payer: Party,
    pub recipient: Option<Party>,
    pub purpose: PaymentPurpose,
    pub metadata: BTreeMap<String, String>,
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn GatewayClient>,
    audit: Arc<dyn AuditSink>,
    transitions: Arc<TransitionService>,
    default_currency: String,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn GatewayClient>,
        audit: Arc<dyn AuditSink>,
        transitions: Arc<TransitionService>,
        default_currency: String,
    ) -> Self {
        Self {
            payments,
            gateway,
            audit,
            transitions,
            default_currency,
        }
    }

    /// Registers an order with the gateway and stores the record in `created`.
    pub async fn create(&self, new: NewPayment) -> Result<TransactionRecord, PaymentError> {
        let order_id = sanitize_string(&new.order_id);
        validate_order_id(&order_id)?;
        validate_positive_amount(new.amount)?;
        validate_party_id("payer.id", &new.payer.id)?;
        if let Some(recipient) = &new.recipient {
            validate_party_id("recipient.id", &recipient.id)?;
        }
        validate_metadata(new.metadata.iter())?;

        let currency = new
            .currency
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());
        validate_currency(&currency)?;

        // Checked before the gateway call; the store's unique constraint
        // still decides races.
        match self.payments.get(&PaymentLookup::OrderId(order_id.clone())).await {
            Ok(_) => return Err(PaymentError::DuplicateOrderId(order_id)),
            Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let gateway_order_id = self
            .gateway
            .create_order(&CreateOrder {
                amount: new.amount,
                currency: currency.clone(),
                receipt: order_id.clone(),
                metadata: new.metadata.clone(),
            })
            .await?;

        let record = self
            .payments
            .create(PaymentDraft {
                order_id,
                gateway_order_id,
                amount: new.amount,
                currency,
                payer: new.payer,
                recipient: new.recipient,
                purpose: new.purpose,
                metadata: new.metadata,
            })
            .await?;

        tracing::info!(
            payment_id = %record.id,
            order_id = %record.order_id,
            gateway_order_id = %record.gateway_order_id,
            amount = record.amount,
            "Payment created"
        );

        let event = AuditEvent::new(Actor::from(&record.payer), "payment.create", TARGET_PAYMENT, record.id)
            .with_details(json!({
                "order_id": record.order_id,
                "gateway_order_id": record.gateway_order_id,
                "amount": record.amount,
                "currency": record.currency,
            }));
        emit_audit(self.audit.as_ref(), event).await;

        Ok(record)
    }

    /// `created -> pending`. Repeating it on a pending payment is a no-op.
    pub async fn begin_checkout(
        &self,
        lookup: &PaymentLookup,
        actor: Actor,
    ) -> Result<TransitionOutcome, PaymentError> {
        self.transitions
            .apply(lookup, TransitionRequest::BeginCheckout, actor)
            .await
    }

    pub async fn get(&self, lookup: &PaymentLookup) -> Result<TransactionRecord, PaymentError> {
        Ok(self.payments.get(lookup).await?)
    }
}
