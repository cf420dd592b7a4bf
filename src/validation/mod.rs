use std::fmt;

use crate::config::settings::RuntimeSettings;
use crate::domain::Evidence;

pub const ORDER_ID_MAX_LEN: usize = 64;
pub const PARTY_ID_MAX_LEN: usize = 128;
pub const METADATA_MAX_ENTRIES: usize = 20;
pub const METADATA_VALUE_MAX_LEN: usize = 512;
pub const EVIDENCE_KIND_MAX_LEN: usize = 32;
pub const EVIDENCE_URL_MAX_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a three-letter uppercase ISO-4217 code",
        ));
    }

    Ok(())
}

pub fn validate_order_id(order_id: &str) -> ValidationResult {
    validate_required("order_id", order_id)?;
    validate_max_len("order_id", order_id, ORDER_ID_MAX_LEN)?;

    if !order_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(ValidationError::new(
            "order_id",
            "must contain only letters, digits, '_' and '-'",
        ));
    }

    Ok(())
}

pub fn validate_party_id(field: &'static str, id: &str) -> ValidationResult {
    validate_required(field, id)?;
    validate_max_len(field, id, PARTY_ID_MAX_LEN)
}

pub fn validate_metadata<'a, I>(entries: I) -> ValidationResult
where
    I: ExactSizeIterator<Item = (&'a String, &'a String)>,
{
    if entries.len() > METADATA_MAX_ENTRIES {
        return Err(ValidationError::new(
            "metadata",
            format!("must have at most {} entries", METADATA_MAX_ENTRIES),
        ));
    }

    for (key, value) in entries {
        validate_required("metadata", key)?;
        validate_max_len("metadata", value, METADATA_VALUE_MAX_LEN)?;
    }

    Ok(())
}

/// Reason bounds come from the runtime settings.
pub fn validate_refund_reason(reason: &str, settings: &RuntimeSettings) -> ValidationResult {
    let length = reason.chars().count();
    if length < settings.refund_reason_min_len || length > settings.refund_reason_max_len {
        return Err(ValidationError::new(
            "reason",
            format!(
                "must be between {} and {} characters",
                settings.refund_reason_min_len, settings.refund_reason_max_len
            ),
        ));
    }

    Ok(())
}

pub fn validate_evidence(evidence: &[Evidence], settings: &RuntimeSettings) -> ValidationResult {
    if evidence.len() > settings.refund_evidence_max_items {
        return Err(ValidationError::new(
            "evidence",
            format!(
                "must have at most {} items",
                settings.refund_evidence_max_items
            ),
        ));
    }

    for item in evidence {
        validate_required("evidence.kind", &item.kind)?;
        validate_max_len("evidence.kind", &item.kind, EVIDENCE_KIND_MAX_LEN)?;
        validate_max_len("evidence.url", &item.url, EVIDENCE_URL_MAX_LEN)?;

        match url::Url::parse(&item.url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(ValidationError::new(
                    "evidence.url",
                    "must be an absolute http(s) URL",
                ))
            }
        }
    }

    Ok(())
}
