mod config;
mod sweep;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pitstay_api::auth::{AppState, AppStateInner};
use pitstay_api::middleware::decode_token;
use pitstay_db::Database;
use pitstay_gateway::Dispatcher;
use pitstay_gateway::connection;

use crate::config::ServerConfig;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pitstay=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner::new(
        db,
        dispatcher,
        config.jwt_secret.clone(),
        config.policy.clone(),
    ));

    let shutdown = CancellationToken::new();
    let sweep_task = tokio::spawn(sweep::run_sweep_loop(
        app_state.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state.clone());

    let app = Router::new()
        .route("/health", get(health))
        .merge(pitstay_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Pitstay server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    sweep_task.await.ok();
    info!("Pitstay server stopped");

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `?token=` authenticates at upgrade. Without it the client must send
/// `Identify` as its first frame.
async fn ws_upgrade(
    State(app): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let dispatcher = app.dispatcher.clone();
    let db = app.db.clone();

    match query.token {
        Some(token) => match decode_token(&app.jwt_secret, &token) {
            Some(claims) => ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, dispatcher, db, claims.sub, claims.username)
            }),
            None => {
                warn!("Rejected gateway upgrade with invalid token");
                StatusCode::UNAUTHORIZED.into_response()
            }
        },
        None => {
            let jwt_secret = app.jwt_secret.clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, jwt_secret))
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    shutdown.cancel();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
    shutdown.cancel();
}
