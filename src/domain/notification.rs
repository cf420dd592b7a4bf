use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Downstream notification sent after a transition commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    PaymentCaptured {
        payment_id: Uuid,
        order_id: String,
        amount: i64,
        currency: String,
        metadata: BTreeMap<String, String>,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: String,
        reason: Option<String>,
    },
    RefundRequestOpened {
        refund_request_id: Uuid,
        payment_id: Uuid,
        amount: i64,
    },
    RefundRequestRejected {
        refund_request_id: Uuid,
        payment_id: Uuid,
    },
    RefundProcessed {
        refund_request_id: Uuid,
        payment_id: Uuid,
        amount: i64,
    },
    RefundFailed {
        refund_request_id: Uuid,
        payment_id: Uuid,
        reason: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::PaymentCaptured { .. } => "payment_captured",
            Notification::PaymentFailed { .. } => "payment_failed",
            Notification::RefundRequestOpened { .. } => "refund_request_opened",
            Notification::RefundRequestRejected { .. } => "refund_request_rejected",
            Notification::RefundProcessed { .. } => "refund_processed",
            Notification::RefundFailed { .. } => "refund_failed",
        }
    }
}
