use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use lancer_types::api::{AddTimelineEntryRequest, Claims, ContractResponse};

use crate::AppState;
use crate::error::ApiError;

pub async fn get_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (contract, timeline) = state.contracts.get_contract(&contract_id, &claims.sub).await?;
    Ok(Json(ContractResponse { contract, timeline }))
}

pub async fn fund_escrow(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let contract = state.contracts.fund_escrow(&contract_id, &claims.sub).await?;
    Ok(Json(contract))
}

pub async fn release_payment(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let contract = state
        .contracts
        .release_payment(&contract_id, &claims.sub)
        .await?;
    Ok(Json(contract))
}

pub async fn mark_complete(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let contract = state
        .contracts
        .mark_complete(&contract_id, &claims.sub)
        .await?;
    Ok(Json(contract))
}

pub async fn raise_dispute(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let contract = state
        .contracts
        .raise_dispute(&contract_id, &claims.sub)
        .await?;
    Ok(Json(contract))
}

pub async fn cancel_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let contract = state.contracts.cancel(&contract_id, &claims.sub).await?;
    Ok(Json(contract))
}

pub async fn add_timeline_entry(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddTimelineEntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .contracts
        .add_timeline_entry(&contract_id, &claims.sub, req.entry)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
