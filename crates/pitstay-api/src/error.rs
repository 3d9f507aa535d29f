use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use pitstay_core::BookingError;
use pitstay_types::api::{ErrorBody, ErrorKind};

/// Every error a handler can return. Rendered as `ErrorBody` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] BookingError),

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("{0}")]
    BadRequest(String),

    #[error("username is already taken")]
    UsernameTaken,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, ErrorKind) {
        match self {
            ApiError::Domain(e) => {
                let kind = e.kind();
                let status = match kind {
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::InsufficientPoints => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::InvalidTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::Expired => StatusCode::GONE,
                    ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, kind)
            }
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, ErrorKind::Unauthorized),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorKind::Validation),
            ApiError::UsernameTaken => (StatusCode::CONFLICT, ErrorKind::Conflict),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Server),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = if kind == ErrorKind::Server {
            error!("Internal Server Error: {:#}", self);
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorBody { error: message, kind })).into_response()
    }
}

/// Run synchronous store work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, BookingError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitstay_types::models::BookingStatus;

    #[test]
    fn domain_errors_map_to_distinct_statuses() {
        let cases = [
            (BookingError::validation("bad"), StatusCode::BAD_REQUEST),
            (BookingError::InsufficientPoints { balance: 1, required: 2 }, StatusCode::UNPROCESSABLE_ENTITY),
            (BookingError::unauthorized("no"), StatusCode::FORBIDDEN),
            (
                BookingError::InvalidTransition { from: BookingStatus::Completed, to: BookingStatus::Cancelled },
                StatusCode::CONFLICT,
            ),
            (
                BookingError::Conflict { expected: BookingStatus::Pending, actual: BookingStatus::Accepted },
                StatusCode::CONFLICT,
            ),
            (BookingError::Expired { deadline: chrono::Utc::now() }, StatusCode::GONE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn missing_token_is_401_not_403() {
        assert_eq!(ApiError::Unauthenticated.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
