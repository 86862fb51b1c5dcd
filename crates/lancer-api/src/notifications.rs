use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use lancer_core::Error;
use lancer_types::api::{Claims, MarkNotificationsReadRequest, NotificationListResponse};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();
    let limit = query.limit.min(200);

    let notifications = tokio::task::spawn_blocking(move || {
        db.list_notifications(&recipient, limit)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError(Error::Internal(anyhow::anyhow!("join error")))
    })?
    .map_err(|e| ApiError(Error::Internal(e)))?;

    Ok(Json(NotificationListResponse { notifications }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkNotificationsReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let recipient = claims.sub.clone();

    let updated = tokio::task::spawn_blocking(move || {
        db.mark_notifications_read(&recipient, &req.ids)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError(Error::Internal(anyhow::anyhow!("join error")))
    })?
    .map_err(|e| ApiError(Error::Internal(e)))?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}
