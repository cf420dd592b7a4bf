pub mod admin;
pub mod health;
pub mod payments;
pub mod refunds;
pub mod webhook;

use serde::Deserialize;

/// `?limit=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn or(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default)
    }
}
