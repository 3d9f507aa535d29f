//! REST surface: auth, bookings, messages, points and notifications.

pub mod auth;
pub mod bookings;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod points;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// All REST routes. Everything except `/auth/*` requires a bearer token.
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/bookings", get(bookings::list_bookings).post(bookings::create_booking))
        .route("/bookings/sweep", post(bookings::sweep))
        .route("/bookings/{booking_id}", get(bookings::get_booking))
        .route("/bookings/{booking_id}/respond", post(bookings::respond))
        .route("/bookings/{booking_id}/confirm", post(bookings::confirm))
        .route("/bookings/{booking_id}/cancel", post(bookings::cancel))
        .route("/bookings/{booking_id}/complete", post(bookings::complete))
        .route(
            "/bookings/{booking_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/bookings/{booking_id}/messages/read", post(messages::mark_read))
        .route("/points/balance", get(points::balance))
        .route("/points/transactions", get(points::transactions))
        .route("/notifications", get(notifications::list))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
