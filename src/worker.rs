//! Reconciliation loop.
//!
//! [`Verifier`] is the single-payment pipeline (price, adapter, match,
//! credit) shared by the background worker and the admin force-verify path.
//! [`ReconciliationWorker`] drives it on a ticker for every open payment.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chains::AdapterRegistry;
use crate::config::defaults;
use crate::errors::{ReconcileError, StoreError};
use crate::ledger::CreditLedger;
use crate::matching::{MatchEngine, MatchOutcome};
use crate::metrics::Metrics;
use crate::models::{PaymentState, PendingPayment};
use crate::notify::PaymentNotifier;
use crate::oracle::PriceOracle;
use crate::store::PendingPaymentStore;
use crate::util::warn_throttled;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    /// Payments older than this are expired instead of polled.
    pub horizon: chrono::Duration,
    /// Payments verified at the same time within one cycle.
    pub concurrency: usize,
    pub per_payment_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
            horizon: chrono::Duration::hours(defaults::HORIZON_HOURS as i64),
            concurrency: defaults::WORKER_CONCURRENCY as usize,
            per_payment_delay: Duration::from_millis(defaults::PER_PAYMENT_DELAY_MS),
        }
    }
}

const SKIP_WARN_PERIOD: Duration = Duration::from_secs(600);

/// One verification attempt for one payment.
#[derive(Clone)]
pub struct Verifier {
    store: PendingPaymentStore,
    ledger: CreditLedger,
    oracle: Arc<PriceOracle>,
    adapters: AdapterRegistry,
    engine: MatchEngine,
    notifier: Arc<dyn PaymentNotifier>,
    metrics: Metrics,
}

impl Verifier {
    pub fn new(
        store: PendingPaymentStore,
        ledger: CreditLedger,
        oracle: Arc<PriceOracle>,
        adapters: AdapterRegistry,
        engine: MatchEngine,
        notifier: Arc<dyn PaymentNotifier>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            ledger,
            oracle,
            adapters,
            engine,
            notifier,
            metrics,
        }
    }

    pub fn store(&self) -> &PendingPaymentStore {
        &self.store
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn oracle(&self) -> &Arc<PriceOracle> {
        &self.oracle
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn notifier(&self) -> &Arc<dyn PaymentNotifier> {
        &self.notifier
    }

    /// Price first, then the expected amount, then the chain scan. The
    /// quote is taken once so the price cannot move mid-decision.
    pub async fn verify(&self, payment: &PendingPayment) -> Result<MatchOutcome, ReconcileError> {
        let adapter = self
            .adapters
            .get(payment.asset_class)
            .ok_or(ReconcileError::NoAdapter(payment.asset_class))?;
        let quote = self.oracle.get_rate(payment.asset_class).await?;
        let Some(exp) = self.engine.expectation(payment, quote.usd_rate, adapter.as_ref()) else {
            return Ok(MatchOutcome::NotFound);
        };
        self.metrics.payments_checked_total.inc();
        tracing::debug!(
            payment_id = %payment.id,
            asset = %payment.asset_class,
            expected = %exp.expected_amount,
            rate = %quote.usd_rate,
            rate_source = quote.source.as_str(),
            memo_mode = exp.memo_mode,
            "verifying payment"
        );

        let transfers =
            adapter.list_inbound_transfers(payment.asset_class, &payment.wallet_address, exp.since);
        let outcome = self
            .engine
            .find_match_where(&exp, transfers, |c| -> Result<bool, StoreError> {
                match self.ledger.tx_owner(&c.tx_id)? {
                    Some(owner) if owner != payment.id => {
                        tracing::debug!(
                            payment_id = %payment.id,
                            tx_id = %c.tx_id,
                            %owner,
                            "transfer already settled another payment"
                        );
                        Ok(false)
                    }
                    _ => Ok(true),
                }
            })
            .await?;

        let MatchOutcome::Matched { tx_id, .. } = &outcome else {
            return Ok(outcome);
        };
        self.metrics.matches_total.inc();
        match self.settle(payment, tx_id).await {
            Ok(_) => Ok(outcome),
            // Lost a race: the tx went to another payment, or an admin
            // rejected this one while we were scanning.
            Err(e @ (StoreError::TxAlreadyCredited { .. } | StoreError::InvalidTransition { .. })) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "match not credited");
                Ok(MatchOutcome::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Credit `payment` for `tx_id` through the ledger and notify on the
    /// first credit. `Ok(false)` means someone else already credited it.
    pub async fn settle(&self, payment: &PendingPayment, tx_id: &str) -> Result<bool, StoreError> {
        let credited = self.ledger.credit_once(
            &payment.id,
            &payment.user_id,
            payment.usd_amount,
            tx_id,
            Utc::now(),
        )?;
        if !credited {
            self.metrics.duplicate_credits_total.inc();
            return Ok(false);
        }
        self.metrics.credits_total.inc();
        if let Some(record) = self.ledger.credit_record(&payment.id)? {
            let completed = self.store.require(&payment.id)?;
            self.notifier.credited(&completed, &record).await;
        }
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub expired: usize,
    pub checked: usize,
    pub matched: usize,
    pub skipped: usize,
}

pub struct ReconciliationWorker {
    verifier: Verifier,
    cfg: WorkerConfig,
}

impl ReconciliationWorker {
    pub fn new(verifier: Verifier, cfg: WorkerConfig) -> Self {
        Self { verifier, cfg }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.cfg
    }

    /// Tick until `shutdown` fires. A cycle in progress at shutdown is
    /// dropped; every store write is a single transaction, so nothing is
    /// left half-applied.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.cfg.interval.as_secs(),
            horizon_hours = self.cfg.horizon.num_hours(),
            concurrency = self.cfg.concurrency,
            "reconciliation worker started"
        );
        let mut interval = time::interval(self.cfg.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.run_cycle() => match res {
                    Ok(report) => tracing::info!(
                        expired = report.expired,
                        checked = report.checked,
                        matched = report.matched,
                        skipped = report.skipped,
                        "reconciliation cycle done"
                    ),
                    Err(e) => tracing::error!(error = %e, "reconciliation cycle aborted: storage failure"),
                },
            }
        }
        tracing::info!("reconciliation worker stopped");
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Open payments past the horizon become Expired. Returns how many
    /// moved; one credited concurrently is left alone.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let v = &self.verifier;
        let mut expired = 0;
        for stale in v.store.list_expirable(now, self.cfg.horizon)? {
            if v.store.mark_expired(&stale.id)? {
                expired += 1;
                v.metrics.expired_total.inc();
                let stale = PendingPayment {
                    state: PaymentState::Expired,
                    ..stale
                };
                v.notifier.expired(&stale).await;
            }
        }
        Ok(expired)
    }

    /// One pass: expire stale payments, then verify every open one with
    /// bounded concurrency. Only storage failures abort the cycle.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let v = &self.verifier;
        v.metrics.cycles_total.inc();
        let mut report = CycleReport {
            expired: self.expire_stale(now).await?,
            ..Default::default()
        };

        let open = v.store.list_open(now, self.cfg.horizon)?;
        let concurrency = self.cfg.concurrency.max(1);
        let delay = self.cfg.per_payment_delay;
        let results: Vec<_> = stream::iter(open.into_iter().enumerate())
            .map(|(i, payment)| async move {
                if i >= concurrency && !delay.is_zero() {
                    time::sleep(delay).await;
                }
                let res = v.verify(&payment).await;
                (payment, res)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut storage_err = None;
        for (payment, res) in results {
            report.checked += 1;
            match res {
                Ok(MatchOutcome::Matched { .. }) => report.matched += 1,
                Ok(MatchOutcome::NotFound) => {}
                Err(ReconcileError::Storage(e)) => {
                    tracing::error!(payment_id = %payment.id, error = %e, "storage failure during verification");
                    storage_err.get_or_insert(e);
                }
                Err(e) => {
                    report.skipped += 1;
                    v.metrics.skipped_total.inc();
                    warn_throttled(
                        format!("skip:{}", payment.asset_class),
                        SKIP_WARN_PERIOD,
                        format!("payment {} skipped this cycle: {}", payment.id, e),
                    );
                }
            }
        }
        match storage_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
