//! Storage adapters implementing the traits in `crate::ports`.

pub mod in_memory;
pub mod postgres_audit_sink;
pub mod postgres_payment_repository;
pub mod postgres_refund_repository;

pub use in_memory::{
    InMemoryAuditSink, InMemoryDeadLetterRepository, InMemoryPaymentRepository,
    InMemoryRefundRepository,
};
pub use postgres_audit_sink::{PostgresAuditSink, PostgresDeadLetterRepository};
pub use postgres_payment_repository::PostgresPaymentRepository;
pub use postgres_refund_repository::PostgresRefundRepository;

use std::str::FromStr;

use crate::ports::{RepositoryError, RepositoryResult};

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == UNIQUE_VIOLATION)
}

pub(crate) fn parse_column<T>(column: &str, value: &str) -> RepositoryResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| RepositoryError::Corrupt(format!("{}: {}", column, e)))
}
