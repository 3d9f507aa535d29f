use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use pitstay_types::api::{
    BookingResponse, CancelRequest, Claims, CreateBookingRequest, RespondRequest, SweepResponse,
    TransitionGuard,
};
use pitstay_types::models::Booking;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = run_blocking(move || state.engine.bookings_for_user(claims.sub)).await?;
    Ok(Json(bookings))
}

pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = run_blocking(move || state.engine.request_booking(claims.sub, req)).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Booking>, ApiError> {
    let booking = run_blocking(move || state.engine.get_booking(claims.sub, booking_id)).await?;
    Ok(Json(booking))
}

pub async fn respond(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let resp = run_blocking(move || state.engine.respond(claims.sub, booking_id, &req)).await?;
    Ok(Json(resp))
}

/// Body is optional; an empty POST confirms without a guard.
pub async fn confirm(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    guard: Option<Json<TransitionGuard>>,
) -> Result<Json<BookingResponse>, ApiError> {
    let guard = guard.map(|Json(g)| g).unwrap_or_default();
    let resp = run_blocking(move || state.engine.confirm(claims.sub, booking_id, &guard)).await?;
    Ok(Json(resp))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let resp = run_blocking(move || state.engine.cancel(claims.sub, booking_id, &req)).await?;
    Ok(Json(resp))
}

pub async fn complete(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    guard: Option<Json<TransitionGuard>>,
) -> Result<Json<BookingResponse>, ApiError> {
    let guard = guard.map(|Json(g)| g).unwrap_or_default();
    let resp = run_blocking(move || state.engine.complete(claims.sub, booking_id, &guard)).await?;
    Ok(Json(resp))
}

/// Client-triggered expiry pass, run on session start.
pub async fn sweep(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<SweepResponse>, ApiError> {
    let expired = run_blocking(move || state.engine.sweep()).await?;
    Ok(Json(SweepResponse { expired }))
}
