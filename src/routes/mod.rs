//! HTTP surface.
//!
//! - `deposits` - payer-facing intent creation, status and balance
//! - `admin` - force verify / complete / reject, behind `X-Admin-Token`
//! - oracle snapshot, health and Prometheus metrics

pub mod admin;
pub mod deposits;
pub mod security;

use axum::extract::{FromRef, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::deposits::DepositService;
use crate::errors::{DepositError, ReconcileError, StoreError};
use crate::metrics::{metrics_handler, Metrics};
use crate::oracle::{get_prices_handler, PriceOracle};

#[derive(Clone)]
pub struct AppState {
    pub deposits: DepositService,
    pub oracle: Arc<PriceOracle>,
    pub metrics: Metrics,
    pub admin_token: Option<String>,
}

impl FromRef<AppState> for Arc<PriceOracle> {
    fn from_ref(state: &AppState) -> Self {
        state.oracle.clone()
    }
}

impl FromRef<AppState> for Metrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// JSON error body with the status derived from the domain error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<DepositError> for ApiError {
    fn from(e: DepositError) -> Self {
        let status = match &e {
            DepositError::BelowMinimum { .. } | DepositError::Invalid(_) | DepositError::NoWallet(_) => {
                StatusCode::BAD_REQUEST
            }
            DepositError::Store(s) | DepositError::Reconcile(ReconcileError::Storage(s)) => match s {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::InvalidTransition { .. } | StoreError::TxAlreadyCredited { .. } => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            DepositError::Reconcile(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        ApiError::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "ok": false, "error": self.message })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Explicit origin list, or same-origin only when empty.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    if list.is_empty() {
        CorsLayer::new().allow_methods(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(list))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "assets": state.deposits.supported_assets(),
        "credits": state.deposits.verifier().ledger().credit_count(),
    }))
}

pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    if state.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not configured: admin routes will deny every request");
    }
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/oracle/prices", get(get_prices_handler))
        .route("/deposits", post(deposits::create_deposit))
        .route("/deposits/:id", get(deposits::get_status))
        .route("/deposits/:id/tx", post(deposits::submit_tx))
        .route("/users/:user_id/balance", get(deposits::get_balance))
        .route("/admin/deposits/:id/verify", post(admin::force_verify))
        .route("/admin/deposits/:id/complete", post(admin::force_complete))
        .route("/admin/deposits/:id/reject", post(admin::reject))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}
