use chrono::{DateTime, Utc};
use uuid::Uuid;

use pitstay_types::api::ErrorKind;
use pitstay_types::models::BookingStatus;

/// Every failure a booking, ledger, messaging or notification operation can
/// report. Only `Server` is unexpected; the rest are outcomes the caller
/// must handle.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("insufficient points: balance {balance}, required {required}")]
    InsufficientPoints { balance: i64, required: i64 },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("booking is {actual}, expected {expected}")]
    Conflict { expected: BookingStatus, actual: BookingStatus },

    #[error("host response deadline passed at {deadline}")]
    Expired { deadline: DateTime<Utc> },

    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl BookingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InsufficientPoints { .. } => ErrorKind::InsufficientPoints,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::Server(_) => ErrorKind::Server,
        }
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
