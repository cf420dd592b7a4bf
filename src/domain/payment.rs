//! Transaction record domain entity.
//! Framework-agnostic representation of one payment attempt and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a payment.
///
/// Terminal states: `Refunded`, `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Pending,
    Authorized,
    Captured,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Created,
        PaymentStatus::Pending,
        PaymentStatus::Authorized,
        PaymentStatus::Captured,
        PaymentStatus::Refunded,
        PaymentStatus::Failed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown payment status '{}'", s))
    }
}

/// Class of account taking part in a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    User,
    Artisan,
}

impl PartyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyKind::User => "user",
            PartyKind::Artisan => "artisan",
        }
    }
}

impl FromStr for PartyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PartyKind::User),
            "artisan" => Ok(PartyKind::Artisan),
            other => Err(format!("unknown party kind '{}'", other)),
        }
    }
}

/// A payer, recipient or refund requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub kind: PartyKind,
}

impl Party {
    pub fn new(id: impl Into<String>, kind: PartyKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    Consultation,
    ProductPurchase,
    Service,
    Subscription,
    Other,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::Consultation => "consultation",
            PaymentPurpose::ProductPurchase => "product_purchase",
            PaymentPurpose::Service => "service",
            PaymentPurpose::Subscription => "subscription",
            PaymentPurpose::Other => "other",
        }
    }
}

impl FromStr for PaymentPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consultation" => Ok(PaymentPurpose::Consultation),
            "product_purchase" => Ok(PaymentPurpose::ProductPurchase),
            "service" => Ok(PaymentPurpose::Service),
            "subscription" => Ok(PaymentPurpose::Subscription),
            "other" => Ok(PaymentPurpose::Other),
            other => Err(format!("unknown payment purpose '{}'", other)),
        }
    }
}

/// Identity under which a payment can be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLookup {
    Id(Uuid),
    OrderId(String),
    GatewayOrderId(String),
}

impl fmt::Display for PaymentLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentLookup::Id(id) => write!(f, "id={}", id),
            PaymentLookup::OrderId(order_id) => write!(f, "order_id={}", order_id),
            PaymentLookup::GatewayOrderId(id) => write!(f, "gateway_order_id={}", id),
        }
    }
}

/// Everything needed to persist a new payment in `created` state.
#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub order_id: String,
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub payer: Party,
    pub recipient: Option<Party>,
    pub purpose: PaymentPurpose,
    pub metadata: BTreeMap<String, String>,
}

/// Durable record of one payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub order_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payer: Party,
    pub recipient: Option<Party>,
    pub purpose: PaymentPurpose,
    pub metadata: BTreeMap<String, String>,
    pub failure_reason: Option<String>,
    pub refund_id: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn from_draft(draft: PaymentDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: draft.order_id,
            gateway_order_id: draft.gateway_order_id,
            gateway_payment_id: None,
            amount: draft.amount,
            currency: draft.currency,
            status: PaymentStatus::Created,
            payer: draft.payer,
            recipient: draft.recipient,
            purpose: draft.purpose,
            metadata: draft.metadata,
            failure_reason: None,
            refund_id: None,
            refund_amount: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when `party` is the payer or the recipient of this payment.
    pub fn involves(&self, party: &Party) -> bool {
        self.payer == *party || self.recipient.as_ref() == Some(party)
    }
}

/// Read-only projection handed to dashboards and order views.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: Uuid,
    pub order_id: String,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payer: Party,
    pub recipient: Option<Party>,
    pub purpose: PaymentPurpose,
    pub metadata: BTreeMap<String, String>,
    pub refund_id: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransactionRecord> for PaymentView {
    fn from(record: TransactionRecord) -> Self {
        Self {
            id: record.id,
            order_id: record.order_id,
            gateway_order_id: record.gateway_order_id,
            gateway_payment_id: record.gateway_payment_id,
            amount: record.amount,
            currency: record.currency,
            status: record.status,
            payer: record.payer,
            recipient: record.recipient,
            purpose: record.purpose,
            metadata: record.metadata,
            refund_id: record.refund_id,
            refund_amount: record.refund_amount,
            refunded_at: record.refunded_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
