use uuid::Uuid;

use pitstay_types::api::{ErrorBody, ErrorKind};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client-side view of every failure. Server errors are mapped back from the
/// `kind` field of the JSON error body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not allowed: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Someone else changed the entity first. Re-fetch before retrying.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error: {0}")]
    Server(String),

    /// Another mutation on the same entity has not settled yet.
    #[error("an operation on {0} is already in flight")]
    Busy(Uuid),

    #[error("{0}")]
    Lifecycle(&'static str),
}

impl ClientError {
    pub fn from_body(body: ErrorBody) -> Self {
        let ErrorBody { error, kind } = body;
        match kind {
            ErrorKind::Validation | ErrorKind::InsufficientPoints => ClientError::Validation(error),
            ErrorKind::Unauthorized => ClientError::Unauthorized(error),
            ErrorKind::NotFound => ClientError::NotFound(error),
            ErrorKind::InvalidTransition => ClientError::InvalidTransition(error),
            ErrorKind::Conflict => ClientError::Conflict(error),
            ErrorKind::Expired => ClientError::Expired(error),
            ErrorKind::Server => ClientError::Server(error),
        }
    }

    /// Only transport failures are retried, and only for reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Server(format!("malformed response: {e}"))
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(kind: ErrorKind) -> ErrorBody {
        ErrorBody { error: "x".into(), kind }
    }

    #[test]
    fn kinds_map_back_to_the_taxonomy() {
        assert!(matches!(ClientError::from_body(body(ErrorKind::Conflict)), ClientError::Conflict(_)));
        assert!(matches!(
            ClientError::from_body(body(ErrorKind::InvalidTransition)),
            ClientError::InvalidTransition(_)
        ));
        assert!(matches!(
            ClientError::from_body(body(ErrorKind::InsufficientPoints)),
            ClientError::Validation(_)
        ));
        assert!(matches!(ClientError::from_body(body(ErrorKind::Expired)), ClientError::Expired(_)));
    }

    #[test]
    fn only_network_errors_are_transient() {
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(!ClientError::Server("boom".into()).is_transient());
        assert!(!ClientError::Conflict("stale".into()).is_transient());
    }
}
