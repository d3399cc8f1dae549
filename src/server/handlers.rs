//! Route handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::compound;

use super::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// `GET /provider/:key` returns the community subgraph of one provider.
pub async fn get_provider_data(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Response {
    let Ok(app_id) = key.parse::<u64>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "bad request" })),
        )
            .into_response();
    };

    match compound::get_community(&state.pool, app_id).await {
        Ok(community) => Json(json!({ "community": community })).into_response(),
        Err(e) if e.is_not_found() => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(app_id, "community read failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal server error" })),
            )
                .into_response()
        }
    }
}

/// `GET /sync/:provider_type/:key` acknowledges immediately and triggers the
/// sync asynchronously.
pub async fn sync_by_provider(
    State(state): State<AppState>,
    Path((provider_type, key)): Path<(String, String)>,
) -> Response {
    let Some(provider) = state
        .providers
        .iter()
        .find(|p| p.kind() == provider_type)
        .cloned()
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": "provider not found" })),
        )
            .into_response();
    };

    let Ok(app_id) = key.parse::<u64>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "bad request" })),
        )
            .into_response();
    };

    tokio::spawn(async move {
        if let Err(e) = provider.sync(app_id, 0).await {
            tracing::error!(app_id, "on-demand sync failed: {e}");
        }
    });

    Json(json!({ "ok": true })).into_response()
}
