//! Payer-facing deposit endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{ApiError, ApiResult, AppState};
use crate::asset::AssetClass;
use crate::deposits::{BalanceView, DepositIntent, PaymentStatus};
use crate::models::PendingPayment;

#[derive(Debug, Deserialize)]
pub struct CreateDepositRequest {
    pub user_id: String,
    pub usd_amount: Decimal,
    pub asset_class: String,
}

#[derive(Debug, Deserialize)]
pub struct TxHintRequest {
    pub tx_id: String,
}

/// `POST /deposits`
pub async fn create_deposit(
    State(state): State<AppState>,
    Json(req): Json<CreateDepositRequest>,
) -> Result<(StatusCode, Json<DepositIntent>), ApiError> {
    let asset: AssetClass = req
        .asset_class
        .parse()
        .map_err(|e: crate::asset::UnknownAsset| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    let intent = state
        .deposits
        .create_deposit(&req.user_id, req.usd_amount, asset)
        .await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

/// `GET /deposits/:id`
pub async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<PaymentStatus> {
    Ok(Json(state.deposits.get_payment_status(&id)?))
}

/// `POST /deposits/:id/tx`
pub async fn submit_tx(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TxHintRequest>,
) -> ApiResult<PendingPayment> {
    Ok(Json(state.deposits.submit_tx_hint(&id, &req.tx_id)?))
}

/// `GET /users/:user_id/balance`
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<BalanceView> {
    Ok(Json(state.deposits.balance(&user_id)?))
}
