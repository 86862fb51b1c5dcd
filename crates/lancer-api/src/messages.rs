use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use lancer_types::api::{Claims, EditMessageRequest, MessageHistoryResponse, SendMessageRequest};
use lancer_types::models::MessageKind;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the smallest seq of the previous
    /// page to fetch older messages.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .chat
        .send_message(
            &room_id,
            &claims.sub,
            req.content,
            req.kind.unwrap_or(MessageKind::Text),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .chat
        .history(&room_id, &claims.sub, query.limit, query.before)
        .await?;

    Ok(Json(MessageHistoryResponse { messages }))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .chat
        .edit_message(&message_id, &claims.sub, req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.chat.delete_message(&message_id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
