use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::TransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("insufficient loyalty points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidToken => ErrorKind::InvalidToken,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InsufficientPoints { .. } => ErrorKind::InsufficientPoints,
        }
    }
}

impl From<TransitionError> for DomainError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::InvalidToken => Self::InvalidToken,
            TransitionError::Unauthorized { .. } => Self::Unauthorized(value.to_string()),
            TransitionError::MissingFinalPrice { .. } | TransitionError::InvalidInput(_) => {
                Self::Validation(value.to_string())
            }
            TransitionError::NotPermitted { .. } | TransitionError::Terminal { .. } => {
                Self::Conflict(value.to_string())
            }
        }
    }
}

/// Failures surfaced by the storage seams.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} `{id}` was modified concurrently")]
    StaleWrite { entity: &'static str, id: String },
    #[error("{entity} with key `{key}` already exists")]
    Duplicate { entity: &'static str, key: String },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<TransitionError> for ApplicationError {
    fn from(value: TransitionError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::StaleWrite { .. } | StoreError::Duplicate { .. } => {
                Self::Domain(DomainError::Conflict(value.to_string()))
            }
            StoreError::Backend(message) => Self::Persistence(message),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    InvalidToken,
    Conflict,
    InsufficientPoints,
    Unavailable,
    Internal,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct InterfaceError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation => {
                "The request could not be processed. Check inputs and try again."
            }
            ErrorKind::NotFound => "The requested quote or account does not exist.",
            ErrorKind::Unauthorized => "You are not allowed to act on this quote.",
            ErrorKind::InvalidToken => {
                "This link is invalid or has expired. Please request a new quote link."
            }
            ErrorKind::Conflict => "The quote is not in a state that allows this action.",
            ErrorKind::InsufficientPoints => "Not enough loyalty points for this discount.",
            ErrorKind::Unavailable => "The service is temporarily unavailable. Please retry shortly.",
            ErrorKind::Internal => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(error) => error.kind(),
            Self::Persistence(_) | Self::Integration(_) => ErrorKind::Unavailable,
            Self::Configuration(_) => ErrorKind::Internal,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let kind = self.kind();
        let message = match &self {
            // Backend details stay in the logs.
            Self::Persistence(_) | Self::Integration(_) | Self::Configuration(_) => {
                "internal dependency failure".to_owned()
            }
            Self::Domain(error) => error.to_string(),
        };
        InterfaceError { kind, message, correlation_id: correlation_id.into() }
    }
}
