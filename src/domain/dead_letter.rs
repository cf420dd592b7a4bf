use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A webhook event that could not be matched to any stored payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeadLetter {
    pub id: Uuid,
    pub event_type: String,
    pub gateway_order_id: String,
    pub payload: serde_json::Value,
    pub reason: String,
    pub received_at: DateTime<Utc>,
}

impl WebhookDeadLetter {
    pub fn new(
        event_type: impl Into<String>,
        gateway_order_id: impl Into<String>,
        payload: serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            gateway_order_id: gateway_order_id.into(),
            payload,
            reason: reason.into(),
            received_at: Utc::now(),
        }
    }
}
