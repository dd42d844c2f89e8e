//! Deposit intents and the operator actions around them.
//!
//! This is the inbound surface used by the chat front-end and admins:
//! create an intent, poll its status, and force verification, completion
//! or rejection. Every credit goes through [`Verifier::settle`], so manual
//! and automatic paths share the same at-most-once ledger.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::asset::AssetClass;
use crate::errors::{DepositError, StoreError};
use crate::matching::MatchOutcome;
use crate::models::{CreditRecord, PaymentState, PendingPayment};
use crate::oracle::QuoteSource;
use crate::worker::Verifier;

#[derive(Debug, Clone)]
pub struct DepositConfig {
    pub min_usd: Decimal,
    /// Custodial receiving address per asset class.
    pub wallets: HashMap<AssetClass, String>,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            min_usd: Decimal::ONE,
            wallets: HashMap::new(),
        }
    }
}

/// What the payer is asked to send, for display only. Verification always
/// re-quotes.
#[derive(Debug, Clone, Serialize)]
pub struct DepositQuote {
    pub network: &'static str,
    pub expected_amount: Decimal,
    pub usd_rate: Decimal,
    pub rate_source: QuoteSource,
    pub tolerance: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositIntent {
    pub payment: PendingPayment,
    /// Missing when no price could be resolved at creation time.
    pub quote: Option<DepositQuote>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatus {
    pub payment: PendingPayment,
    pub status: &'static str,
    pub credit: Option<CreditRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub user_id: String,
    pub balance_usd: Decimal,
    pub deposits: Vec<PendingPayment>,
}

#[derive(Clone)]
pub struct DepositService {
    verifier: Verifier,
    cfg: DepositConfig,
}

fn reference_memo(user_id: &str, unix_ts: i64) -> String {
    format!("deposit_{user_id}_{unix_ts}")
}

impl DepositService {
    pub fn new(verifier: Verifier, cfg: DepositConfig) -> Self {
        Self { verifier, cfg }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn supported_assets(&self) -> Vec<AssetClass> {
        let mut v: Vec<_> = self.cfg.wallets.keys().copied().collect();
        v.sort();
        v
    }

    pub async fn create_deposit(
        &self,
        user_id: &str,
        usd_amount: Decimal,
        asset_class: AssetClass,
    ) -> Result<DepositIntent, DepositError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(DepositError::Invalid("user_id is empty".into()));
        }
        if usd_amount < self.cfg.min_usd {
            return Err(DepositError::BelowMinimum {
                min: self.cfg.min_usd,
                got: usd_amount,
            });
        }
        let wallet = self
            .cfg
            .wallets
            .get(&asset_class)
            .ok_or(DepositError::NoWallet(asset_class))?;

        let now = Utc::now();
        let memo = asset_class
            .supports_memo()
            .then(|| reference_memo(user_id, now.timestamp()));
        let payment = PendingPayment::new(
            Uuid::new_v4().to_string(),
            user_id,
            usd_amount.normalize(),
            asset_class,
            wallet.clone(),
            memo,
            now,
        );
        self.verifier.store().insert(&payment)?;

        let engine = self.verifier.engine();
        let quote = match self.verifier.oracle().get_rate(asset_class).await {
            Ok(q) => engine
                .expected_amount(payment.usd_amount, q.usd_rate, asset_class)
                .map(|expected_amount| DepositQuote {
                    network: asset_class.display_name(),
                    expected_amount,
                    usd_rate: q.usd_rate,
                    rate_source: q.source,
                    tolerance: engine.tolerance(asset_class),
                }),
            Err(e) => {
                tracing::warn!(asset = %asset_class, error = %e, "deposit created without a quote");
                None
            }
        };

        tracing::info!(
            payment_id = %payment.id,
            user_id,
            asset = %asset_class,
            usd = %payment.usd_amount,
            memo = payment.reference_memo.as_deref().unwrap_or(""),
            "deposit intent created"
        );
        Ok(DepositIntent { payment, quote })
    }

    pub fn get_payment_status(&self, payment_id: &str) -> Result<PaymentStatus, DepositError> {
        let payment = self.verifier.store().require(payment_id)?;
        let credit = self.verifier.ledger().credit_record(payment_id)?;
        Ok(PaymentStatus {
            status: payment.state.user_message(),
            payment,
            credit,
        })
    }

    /// Run the pipeline once for this payment, outside the worker cycle.
    pub async fn force_verify(&self, payment_id: &str) -> Result<MatchOutcome, DepositError> {
        let payment = self.verifier.store().require(payment_id)?;
        match payment.state {
            PaymentState::Completed => {
                let tx_id = match payment.confirmed_tx_id.clone() {
                    Some(tx) => tx,
                    None => self
                        .verifier
                        .ledger()
                        .credit_record(payment_id)?
                        .map(|r| r.tx_id)
                        .ok_or_else(|| {
                            StoreError::Corrupt(format!("{payment_id} completed without a credit"))
                        })?,
                };
                Ok(MatchOutcome::Matched {
                    tx_id,
                    observed_amount: None,
                })
            }
            PaymentState::Failed => Err(StoreError::InvalidTransition {
                id: payment.id,
                from: payment.state,
                action: "verify",
            }
            .into()),
            _ => {
                let outcome = self.verifier.verify(&payment).await?;
                tracing::info!(payment_id, matched = outcome.is_matched(), "manual verification");
                Ok(outcome)
            }
        }
    }

    /// Admin credit with an operator-supplied transaction id.
    pub async fn force_complete(
        &self,
        payment_id: &str,
        tx_id: &str,
    ) -> Result<PaymentStatus, DepositError> {
        let tx_id = tx_id.trim();
        if tx_id.is_empty() {
            return Err(DepositError::Invalid("tx_id is empty".into()));
        }
        let payment = self.verifier.store().require(payment_id)?;
        let credited = self.verifier.settle(&payment, tx_id).await?;
        tracing::info!(payment_id, tx_id, credited, "manual completion");
        self.get_payment_status(payment_id)
    }

    pub fn reject(&self, payment_id: &str, reason: &str) -> Result<PendingPayment, DepositError> {
        let reason = reason.trim();
        let reason = if reason.is_empty() { "rejected by admin" } else { reason };
        let p = self.verifier.store().mark_failed(payment_id, reason)?;
        tracing::info!(payment_id, reason, "payment rejected");
        Ok(p)
    }

    pub fn submit_tx_hint(&self, payment_id: &str, tx_id: &str) -> Result<PendingPayment, DepositError> {
        if tx_id.trim().is_empty() {
            return Err(DepositError::Invalid("tx_id is empty".into()));
        }
        Ok(self.verifier.store().submit_tx_hint(payment_id, tx_id)?)
    }

    pub fn balance(&self, user_id: &str) -> Result<BalanceView, DepositError> {
        Ok(BalanceView {
            user_id: user_id.to_string(),
            balance_usd: self.verifier.ledger().balance_of(user_id)?,
            deposits: self.verifier.store().list_by_user(user_id)?,
        })
    }
}
