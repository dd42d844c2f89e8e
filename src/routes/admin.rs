//! Operator actions on a single deposit. All require `X-Admin-Token` when
//! a token is configured.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use super::security::verify_admin_token;
use super::{ApiResult, AppState};
use crate::deposits::PaymentStatus;
use crate::matching::MatchOutcome;
use crate::models::PendingPayment;

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub tx_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub payment_id: String,
    pub outcome: MatchOutcome,
    pub status: PaymentStatus,
}

/// `POST /admin/deposits/:id/verify`: run the pipeline once, now.
pub async fn force_verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<VerifyResponse> {
    verify_admin_token(state.admin_token.as_deref(), &headers)?;
    tracing::info!(payment_id = %id, "[ADMIN] force verify");
    let outcome = state.deposits.force_verify(&id).await?;
    let status = state.deposits.get_payment_status(&id)?;
    Ok(Json(VerifyResponse {
        payment_id: id,
        outcome,
        status,
    }))
}

/// `POST /admin/deposits/:id/complete`
pub async fn force_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> ApiResult<PaymentStatus> {
    verify_admin_token(state.admin_token.as_deref(), &headers)?;
    tracing::info!(payment_id = %id, tx_id = %req.tx_id, "[ADMIN] force complete");
    Ok(Json(state.deposits.force_complete(&id, &req.tx_id).await?))
}

/// `POST /admin/deposits/:id/reject`
pub async fn reject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<PendingPayment> {
    verify_admin_token(state.admin_token.as_deref(), &headers)?;
    Ok(Json(state.deposits.reject(&id, &req.reason)?))
}
