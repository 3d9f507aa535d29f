use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use pitstay_types::api::{BalanceResponse, Claims};
use pitstay_types::models::PointsTransaction;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn balance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = claims.sub;
    let balance = run_blocking(move || state.ledger.get_balance(user_id)).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Newest first.
pub async fn transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PointsTransaction>>, ApiError> {
    let rows = run_blocking(move || state.ledger.history(claims.sub, query.limit)).await?;
    Ok(Json(rows))
}
