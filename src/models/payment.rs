use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::asset::AssetClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    /// Payer reported a transaction hash; still polled like Pending.
    Verifying,
    Completed,
    Expired,
    Failed,
}

impl PaymentState {
    /// States the reconciliation worker keeps polling.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentState::Pending | PaymentState::Verifying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Verifying => "verifying",
            PaymentState::Completed => "completed",
            PaymentState::Expired => "expired",
            PaymentState::Failed => "failed",
        }
    }

    /// Status line shown to the payer.
    pub fn user_message(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending, still checking",
            PaymentState::Verifying => "transaction reported, still checking",
            PaymentState::Completed => "payment received, balance credited",
            PaymentState::Expired => "not received within the allowed window, contact support",
            PaymentState::Failed => "payment rejected, contact support",
        }
    }
}

/// A deposit intent awaiting an on-chain transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub id: String,
    pub user_id: String,
    pub usd_amount: Decimal,
    pub asset_class: AssetClass,
    pub wallet_address: String,
    #[serde(default)]
    pub reference_memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: PaymentState,
    #[serde(default)]
    pub confirmed_tx_id: Option<String>,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Hash the payer says they sent; informational, matching still runs.
    #[serde(default)]
    pub claimed_tx_id: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl PendingPayment {
    pub fn new(
        id: String,
        user_id: impl Into<String>,
        usd_amount: Decimal,
        asset_class: AssetClass,
        wallet_address: impl Into<String>,
        reference_memo: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            usd_amount,
            asset_class,
            wallet_address: wallet_address.into(),
            reference_memo,
            created_at,
            state: PaymentState::Pending,
            confirmed_tx_id: None,
            confirmed_at: None,
            claimed_tx_id: None,
            failure_reason: None,
        }
    }

    /// True once `created_at + horizon` lies in the past.
    pub fn is_past_horizon(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> bool {
        now > self.created_at + horizon
    }
}

/// Append-only proof that a payment was credited. Keyed by `payment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRecord {
    pub payment_id: String,
    pub user_id: String,
    pub usd_amount: Decimal,
    pub tx_id: String,
    pub credited_at: DateTime<Utc>,
}
