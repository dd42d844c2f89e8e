//! Multi-chain deposit reconciliation.
//!
//! Users announce a USD deposit in a chosen asset; a background worker
//! watches the custodial address on that chain, matches inbound transfers
//! against the expected amount (or a reference memo) and credits the
//! user's balance exactly once.

pub mod asset;
pub mod chains;
pub mod config;
pub mod deposits;
pub mod errors;
pub mod ledger;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod oracle;
pub mod routes;
pub mod shutdown;
pub mod store;
pub mod upstream;
pub mod util;
pub mod worker;

use std::sync::Arc;

use crate::chains::AdapterRegistry;
use crate::config::ResolvedConfig;
use crate::deposits::DepositService;
use crate::errors::{StoreError, UpstreamError};
use crate::ledger::CreditLedger;
use crate::matching::MatchEngine;
use crate::metrics::Metrics;
use crate::notify::PaymentNotifier;
use crate::oracle::PriceOracle;
use crate::store::PendingPaymentStore;
use crate::upstream::UpstreamClient;
use crate::worker::{ReconciliationWorker, Verifier};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Every long-lived component, wired from one resolved config.
pub struct Reconciler {
    pub metrics: Metrics,
    pub oracle: Arc<PriceOracle>,
    pub verifier: Verifier,
    pub deposits: DepositService,
    pub worker: ReconciliationWorker,
}

impl Reconciler {
    pub fn build(
        cfg: &ResolvedConfig,
        db: &sled::Db,
        notifier: Arc<dyn PaymentNotifier>,
    ) -> Result<Self, StartupError> {
        let metrics = Metrics::new();
        let client = UpstreamClient::new(cfg.upstream.clone())?.with_metrics(metrics.clone());
        let oracle = Arc::new(
            PriceOracle::from_config(&cfg.oracle, client.clone()).with_metrics(metrics.clone()),
        );
        let adapters =
            AdapterRegistry::from_endpoints(&cfg.endpoints, client, cfg.matching.solana_presence_only);
        Ok(Self::assemble(cfg, db, oracle, adapters, notifier, metrics)?)
    }

    /// Same wiring with caller-supplied oracle and adapters.
    pub fn assemble(
        cfg: &ResolvedConfig,
        db: &sled::Db,
        oracle: Arc<PriceOracle>,
        adapters: AdapterRegistry,
        notifier: Arc<dyn PaymentNotifier>,
        metrics: Metrics,
    ) -> Result<Self, StoreError> {
        let verifier = Verifier::new(
            PendingPaymentStore::open(db)?,
            CreditLedger::open(db)?,
            oracle.clone(),
            adapters,
            MatchEngine::new(cfg.matching.clone()),
            notifier,
            metrics.clone(),
        );
        let deposits = DepositService::new(verifier.clone(), cfg.deposits.clone());
        let worker = ReconciliationWorker::new(verifier.clone(), cfg.worker.clone());
        Ok(Self {
            metrics,
            oracle,
            verifier,
            deposits,
            worker,
        })
    }

    pub fn app_state(&self, admin_token: Option<String>) -> routes::AppState {
        routes::AppState {
            deposits: self.deposits.clone(),
            oracle: self.oracle.clone(),
            metrics: self.metrics.clone(),
            admin_token,
        }
    }
}
