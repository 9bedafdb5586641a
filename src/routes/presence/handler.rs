use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::AppState;
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub synced: usize,
}

/// 从持久存储重建在线位置缓存
#[axum::debug_handler]
pub async fn sync_presence(State(state): State<AppState>) -> impl IntoResponse {
    match state.matcher.sync_from_store().await {
        Ok(synced) => (
            StatusCode::OK,
            success_to_api_response(SyncResponse { synced }),
        ),
        Err(e) => {
            tracing::error!("Presence sync failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            )
        }
    }
}

pub async fn health() -> impl IntoResponse {
    success_to_api_response("ok")
}
