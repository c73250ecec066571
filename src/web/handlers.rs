//! HTTP request handlers.

use super::AppState;
use crate::db::{get_history, get_status};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tokio::task;

/// Body returned for unknown paths.
pub const INFO_TEXT: &str =
    "upwatch uptime monitor\n\nGET /api/status\nGET /api/history?site=<name>\n";

// ============================================================================
// API: Status
// ============================================================================

// Storage calls block on the connection lock, so they run off the runtime.

pub async fn handle_status(State(state): State<AppState>) -> Response {
    let AppState { store, targets } = state;
    let result = task::spawn_blocking(move || {
        get_status(store.as_ref(), targets.iter().map(|t| t.name.as_str()))
    })
    .await;

    match result {
        Ok(Ok(status)) => Json(status).into_response(),
        Ok(Err(e)) => {
            tracing::error!("Failed to read status: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!("Status read task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub site: Option<String>,
}

pub async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(site) = query.site.filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Site parameter required").into_response();
    };

    let store = state.store;
    let name = site.clone();
    let result = task::spawn_blocking(move || get_history(store.as_ref(), &name)).await;

    match result {
        Ok(Ok(history)) => Json(history).into_response(),
        Ok(Err(e)) => {
            tracing::error!("Failed to read history for {}: {}", site, e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!("History read task for {} failed: {}", site, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================================
// Fallback
// ============================================================================

pub async fn handle_info() -> &'static str {
    INFO_TEXT
}
