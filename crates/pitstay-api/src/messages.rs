use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use pitstay_types::api::{Claims, MarkReadResponse, SendMessageRequest, SendMessageResponse};
use pitstay_types::models::Message;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// 201 for a new message, 200 when `client_ref` matched an earlier send.
pub async fn send_message(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (message, replayed) = run_blocking(move || {
        state
            .messaging
            .send_message(claims.sub, booking_id, &req.message, req.client_ref.as_deref())
    })
    .await?;

    let status = if replayed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(SendMessageResponse { message, replayed })))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages =
        run_blocking(move || state.messaging.list_messages(claims.sub, booking_id, query.limit)).await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated =
        run_blocking(move || state.messaging.mark_conversation_read(claims.sub, booking_id)).await?;
    Ok(Json(MarkReadResponse { updated }))
}
