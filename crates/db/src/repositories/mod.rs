use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use fleetquote_core::errors::StoreError;

pub mod account;
pub mod memory;
pub mod quote;

pub use account::{PasswordHasher, SqlAccountRepository};
pub use memory::{InMemoryAccountRepository, InMemoryQuoteRepository};
pub use quote::SqlQuoteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        StoreError::Backend(value.to_string())
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|raw| decode_timestamp(column, &raw)).transpose()
}

pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>().map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    error.as_database_error().is_some_and(|database| database.is_unique_violation())
}
