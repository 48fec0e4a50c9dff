//! Read-only stats API over the ingested click data.
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::store::{AggregateRow, CodeStats, PgStore, StorageError, TrendingRow};

#[derive(Clone)]
struct AppState {
    store: PgStore,
}

pub fn router(store: PgStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats/top", get(top))
        .route("/stats/trending", get(trending))
        .route("/stats/:short_code", get(code_stats))
        .with_state(AppState { store })
}

pub async fn serve(store: PgStore, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("stats API listening on {bind}");
    axum::serve(listener, router(store)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn top(State(state): State<AppState>) -> Result<Json<Vec<AggregateRow>>, ApiError> {
    Ok(Json(state.store.top_aggregates(10).await?))
}

#[derive(Deserialize)]
struct TrendingParams {
    hours: Option<i32>,
}

async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Result<Json<Vec<TrendingRow>>, ApiError> {
    Ok(Json(state.store.trending(params.hours.unwrap_or(24), 10).await?))
}

async fn code_stats(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
) -> Result<Json<CodeStats>, ApiError> {
    match state.store.code_stats(&short_code).await? {
        Some(stats) => Ok(Json(stats)),
        None => Err(ApiError::NotFound(short_code)),
    }
}

enum ApiError {
    NotFound(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(short_code) => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": { "code": "NOT_FOUND", "message": format!("No stats for {short_code}") }
                })),
            )
                .into_response(),
            ApiError::Storage(e) => {
                error!(error = %e, "stats query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": { "code": "INTERNAL", "message": "storage unavailable" }
                    })),
                )
                    .into_response()
            }
        }
    }
}
