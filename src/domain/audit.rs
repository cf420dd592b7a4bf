//! Audit events emitted by every operation that commits a state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::payment::{Party, PartyKind};

pub const TARGET_PAYMENT: &str = "payment";
pub const TARGET_REFUND_REQUEST: &str = "refund_request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    System,
    Gateway,
    Admin,
    User,
    Artisan,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::System => "system",
            ActorKind::Gateway => "gateway",
            ActorKind::Admin => "admin",
            ActorKind::User => "user",
            ActorKind::Artisan => "artisan",
        }
    }
}

impl FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(ActorKind::System),
            "gateway" => Ok(ActorKind::Gateway),
            "admin" => Ok(ActorKind::Admin),
            "user" => Ok(ActorKind::User),
            "artisan" => Ok(ActorKind::Artisan),
            other => Err(format!("unknown actor kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

impl Actor {
    pub fn new(id: impl Into<String>, kind: ActorKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn system() -> Self {
        Self::new("system", ActorKind::System)
    }

    pub fn gateway() -> Self {
        Self::new("gateway", ActorKind::Gateway)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorKind::Admin)
    }
}

impl From<&Party> for Actor {
    fn from(party: &Party) -> Self {
        let kind = match party.kind {
            PartyKind::User => ActorKind::User,
            PartyKind::Artisan => ActorKind::Artisan,
        };
        Self::new(party.id.clone(), kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor: Actor,
    pub action: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub before_status: Option<String>,
    pub after_status: Option<String>,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor: Actor, action: impl Into<String>, target_type: &str, target_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor,
            action: action.into(),
            target_type: target_type.to_string(),
            target_id,
            before_status: None,
            after_status: None,
            details: serde_json::Value::Object(Default::default()),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_statuses(mut self, before: impl ToString, after: impl ToString) -> Self {
        self.before_status = Some(before.to_string());
        self.after_status = Some(after.to_string());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
