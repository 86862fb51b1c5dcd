use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use lancer_types::api::{AcceptBidResponse, Claims, SubmitBidRequest};

use crate::AppState;
use crate::error::ApiError;

pub async fn submit_bid(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitBidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let bid = state
        .bids
        .submit_bid(
            &project_id,
            &claims.sub,
            req.amount,
            req.delivery_days,
            req.proposal,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(bid)))
}

pub async fn accept_bid(
    State(state): State<AppState>,
    Path(bid_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (bid, contract) = state.bids.accept_bid(&bid_id, &claims.sub).await?;
    Ok(Json(AcceptBidResponse { bid, contract }))
}

pub async fn reject_bid(
    State(state): State<AppState>,
    Path(bid_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.bids.reject_bid(&bid_id, &claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
