//! Domain-specific error types for the reconciler
//!
//! One enum per layer. Upstream and oracle errors are recovered locally by
//! the worker; only storage errors escape a reconciliation cycle.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::asset::{AssetClass, PriceKey};
use crate::models::PaymentState;

/// Failures talking to a third-party price source or explorer.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("upstream {host} unavailable: {reason}")]
    Unavailable { host: String, reason: String },

    #[error("malformed response from {host}: {reason}")]
    Malformed { host: String, reason: String },
}

impl UpstreamError {
    pub fn unavailable(host: impl Into<String>, reason: impl ToString) -> Self {
        UpstreamError::Unavailable {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(host: impl Into<String>, reason: impl ToString) -> Self {
        UpstreamError::Malformed {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            UpstreamError::Unavailable { host, .. } | UpstreamError::Malformed { host, .. } => host,
        }
    }
}

/// Price resolution errors
#[derive(Error, Debug, Clone)]
pub enum OracleError {
    #[error("no price available for {0}: all sources, cache and fallback exhausted")]
    NoPriceAvailable(PriceKey),
}

/// Persistence errors (PendingPaymentStore + CreditLedger)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("payment {id}: cannot {action} from state {from:?}")]
    InvalidTransition {
        id: String,
        from: PaymentState,
        action: &'static str,
    },

    #[error("transaction {tx_id} already credited payment {payment_id}")]
    TxAlreadyCredited { tx_id: String, payment_id: String },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Validation errors surfaced to the deposit-intent caller
#[derive(Error, Debug)]
pub enum DepositError {
    #[error("amount ${got} is below the minimum deposit of ${min}")]
    BelowMinimum { min: Decimal, got: Decimal },

    #[error("no custodial wallet configured for {0}")]
    NoWallet(AssetClass),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Outcome of a verification attempt that did not reach a decision.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Storage is unhealthy; surfaced to the cycle's caller.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// Payment skipped this cycle (no usable price); retried next cycle.
    #[error("skipped: {0}")]
    Skipped(#[from] OracleError),

    #[error("no adapter registered for {0}")]
    NoAdapter(AssetClass),
}

impl ReconcileError {
    pub fn is_storage(&self) -> bool {
        matches!(self, ReconcileError::Storage(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_distinguished_from_skips() {
        let e: ReconcileError = StoreError::NotFound("x".into()).into();
        assert!(e.is_storage());
        let e: ReconcileError = OracleError::NoPriceAvailable(PriceKey::Btc).into();
        assert!(!e.is_storage());
        assert!(e.to_string().contains("BTC"));
    }

    #[test]
    fn upstream_error_keeps_host() {
        let e = UpstreamError::malformed("api.etherscan.io", "missing result");
        assert_eq!(e.host(), "api.etherscan.io");
        assert!(e.to_string().contains("malformed"));
    }
}
