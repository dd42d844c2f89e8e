//! USD exchange-rate oracle with a short-lived cache.
//!
//! Resolution order for a price family: fresh cache, primary source,
//! secondary source, last cached value regardless of age, operator floor.
//! Only one refresh per family is in flight at a time; callers that queue
//! behind it re-check the cache and reuse the value it stored.

pub mod sources;

use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::asset::{AssetClass, PriceKey};
use crate::errors::OracleError;
use crate::metrics::Metrics;
use crate::upstream::UpstreamClient;
use crate::util::warn_throttled;

pub use sources::{PriceSource, SourceKind};

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub ttl: Duration,
    pub primary: SourceKind,
    pub secondary: SourceKind,
    pub binance_url: String,
    pub cryptocompare_url: String,
    pub coingecko_url: String,
    pub fallback: BTreeMap<PriceKey, Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Primary,
    Secondary,
    Cache,
    Fallback,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteSource::Primary => "primary",
            QuoteSource::Secondary => "secondary",
            QuoteSource::Cache => "cache",
            QuoteSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub asset_class: AssetClass,
    pub usd_rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub source: QuoteSource,
}

#[derive(Debug, Clone)]
struct CachedRate {
    rate: Decimal,
    fetched_at: DateTime<Utc>,
    stored: Instant,
    origin: &'static str,
}

pub struct PriceOracle {
    primary: Arc<dyn PriceSource>,
    secondary: Arc<dyn PriceSource>,
    ttl: Duration,
    fallback: BTreeMap<PriceKey, Decimal>,
    cache: RwLock<HashMap<PriceKey, CachedRate>>,
    inflight: DashMap<PriceKey, Arc<tokio::sync::Mutex<()>>>,
    metrics: Option<Metrics>,
}

const WARN_PERIOD: Duration = Duration::from_secs(300);

impl PriceOracle {
    pub fn new(
        primary: Arc<dyn PriceSource>,
        secondary: Arc<dyn PriceSource>,
        ttl: Duration,
        fallback: BTreeMap<PriceKey, Decimal>,
    ) -> Self {
        Self {
            primary,
            secondary,
            ttl,
            fallback,
            cache: RwLock::new(HashMap::new()),
            inflight: DashMap::new(),
            metrics: None,
        }
    }

    /// Oracle wired to the configured primary/secondary sources.
    pub fn from_config(cfg: &OracleConfig, client: UpstreamClient) -> Self {
        let primary = sources::build_source(cfg.primary, client.clone(), cfg);
        let secondary = sources::build_source(cfg.secondary, client, cfg);
        Self::new(primary, secondary, cfg.ttl, cfg.fallback.clone())
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn fresh(&self, key: PriceKey) -> Option<CachedRate> {
        let cache = self.cache.read();
        cache
            .get(&key)
            .filter(|c| c.stored.elapsed() < self.ttl)
            .cloned()
    }

    fn quote(&self, asset_class: AssetClass, rate: Decimal, fetched_at: DateTime<Utc>, source: QuoteSource) -> PriceQuote {
        if let Some(m) = &self.metrics {
            m.price_lookups.with_label_values(&[source.as_str()]).inc();
        }
        PriceQuote {
            asset_class,
            usd_rate: rate,
            fetched_at,
            source,
        }
    }

    /// USD rate for `asset_class`. Only errors when every source failed,
    /// nothing was ever cached and no floor rate is configured.
    pub async fn get_rate(&self, asset_class: AssetClass) -> Result<PriceQuote, OracleError> {
        let key = asset_class.price_key();

        if let Some(c) = self.fresh(key) {
            return Ok(self.quote(asset_class, c.rate, c.fetched_at, QuoteSource::Cache));
        }

        let lock = self
            .inflight
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(c) = self.fresh(key) {
            return Ok(self.quote(asset_class, c.rate, c.fetched_at, QuoteSource::Cache));
        }

        for (src, origin) in [
            (&self.primary, QuoteSource::Primary),
            (&self.secondary, QuoteSource::Secondary),
        ] {
            match src.fetch(key).await {
                Ok(rate) => {
                    let now = Utc::now();
                    self.cache.write().insert(
                        key,
                        CachedRate {
                            rate,
                            fetched_at: now,
                            stored: Instant::now(),
                            origin: src.name(),
                        },
                    );
                    tracing::debug!(asset = %key, %rate, source = src.name(), "price refreshed");
                    return Ok(self.quote(asset_class, rate, now, origin));
                }
                Err(e) => {
                    warn_throttled(
                        format!("oracle:{}:{}", src.name(), key),
                        WARN_PERIOD,
                        format!("price source {} failed for {}: {}", src.name(), key, e),
                    );
                }
            }
        }

        if let Some(c) = self.cache.read().get(&key).cloned() {
            tracing::warn!(
                asset = %key,
                rate = %c.rate,
                age_secs = c.stored.elapsed().as_secs(),
                "all price sources failed, using stale cached rate"
            );
            return Ok(self.quote(asset_class, c.rate, c.fetched_at, QuoteSource::Cache));
        }

        if let Some(rate) = self.fallback.get(&key).copied() {
            tracing::warn!(asset = %key, %rate, "all price sources failed, using static fallback rate");
            return Ok(self.quote(asset_class, rate, Utc::now(), QuoteSource::Fallback));
        }

        Err(OracleError::NoPriceAvailable(key))
    }

    /// Populate the cache for every price family; failures fall through to
    /// the usual degradation path and are only logged.
    pub async fn warm(&self) {
        for key in PriceKey::ALL {
            let asset = AssetClass::ALL
                .iter()
                .copied()
                .find(|a| a.price_key() == key);
            if let Some(asset) = asset {
                if let Err(e) = self.get_rate(asset).await {
                    tracing::warn!(asset = %key, error = %e, "price warm-up failed");
                }
            }
        }
    }

    /// Cached quotes for diagnostics.
    pub fn snapshot(&self) -> Vec<QuoteSnapshot> {
        let cache = self.cache.read();
        let mut out: Vec<QuoteSnapshot> = cache
            .iter()
            .map(|(k, c)| QuoteSnapshot {
                family: *k,
                usd_rate: c.rate,
                fetched_at: c.fetched_at,
                source: c.origin,
                stale: c.stored.elapsed() >= self.ttl,
            })
            .collect();
        out.sort_by_key(|q| q.family);
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteSnapshot {
    pub family: PriceKey,
    pub usd_rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub source: &'static str,
    pub stale: bool,
}

/// Response for /oracle/prices endpoint
#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub prices: BTreeMap<String, Decimal>,
    pub quotes: Vec<QuoteSnapshot>,
    pub last_update: Option<String>,
    pub stale: bool,
}

/// HTTP handler to get current prices
pub async fn get_prices_handler(State(oracle): State<Arc<PriceOracle>>) -> Json<PricesResponse> {
    let quotes = oracle.snapshot();
    let prices = quotes
        .iter()
        .map(|q| (q.family.as_str().to_string(), q.usd_rate))
        .collect();
    let last_update = quotes.iter().map(|q| q.fetched_at).max().map(|t| t.to_rfc3339());
    let stale = quotes.is_empty() || quotes.iter().any(|q| q.stale);
    Json(PricesResponse {
        prices,
        quotes,
        last_update,
        stale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UpstreamError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted source: returns `rate` unless `down` is set.
    struct FakeSource {
        name: &'static str,
        rate: Decimal,
        down: AtomicBool,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeSource {
        fn new(name: &'static str, rate: i64) -> Arc<Self> {
            Arc::new(Self {
                name,
                rate: Decimal::new(rate, 0),
                down: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn down(name: &'static str) -> Arc<Self> {
            let s = Self::new(name, 0);
            s.down.store(true, Ordering::SeqCst);
            s
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _key: PriceKey) -> Result<Decimal, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.down.load(Ordering::SeqCst) {
                Err(UpstreamError::unavailable(self.name, "scripted outage"))
            } else {
                Ok(self.rate)
            }
        }
    }

    fn floors() -> BTreeMap<PriceKey, Decimal> {
        BTreeMap::from([(PriceKey::Btc, Decimal::new(106_300, 0))])
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_cached_and_identical() {
        let p = FakeSource::new("p", 60_000);
        let oracle = PriceOracle::new(p.clone(), FakeSource::down("s"), Duration::from_secs(60), floors());

        let a = oracle.get_rate(AssetClass::Btc).await.unwrap();
        let b = oracle.get_rate(AssetClass::Btc).await.unwrap();
        assert_eq!(a.source, QuoteSource::Primary);
        assert_eq!(b.source, QuoteSource::Cache);
        assert_eq!(a.usd_rate, b.usd_rate);
        assert_eq!(a.usd_rate.serialize(), b.usd_rate.serialize());
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evm_variants_share_one_cache_entry() {
        let p = FakeSource::new("p", 3_900);
        let oracle = PriceOracle::new(p.clone(), FakeSource::down("s"), Duration::from_secs(60), floors());
        oracle.get_rate(AssetClass::Eth).await.unwrap();
        let q = oracle.get_rate(AssetClass::EthArbitrum).await.unwrap();
        assert_eq!(q.source, QuoteSource::Cache);
        assert_eq!(q.asset_class, AssetClass::EthArbitrum);
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_ttl() {
        let p = FakeSource::new("p", 60_000);
        let oracle = PriceOracle::new(p.clone(), FakeSource::down("s"), Duration::from_millis(100), floors());
        oracle.get_rate(AssetClass::Btc).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let q = oracle.get_rate(AssetClass::Btc).await.unwrap();
        assert_eq!(q.source, QuoteSource::Primary);
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_through_secondary_stale_cache_and_floor() {
        let p = FakeSource::new("p", 60_000);
        let s = FakeSource::new("s", 59_000);
        let oracle = PriceOracle::new(p.clone(), s.clone(), Duration::from_millis(50), floors());

        // nothing cached, both down -> floor
        p.down.store(true, Ordering::SeqCst);
        s.down.store(true, Ordering::SeqCst);
        let q = oracle.get_rate(AssetClass::Btc).await.unwrap();
        assert_eq!(q.source, QuoteSource::Fallback);
        assert_eq!(q.usd_rate, Decimal::new(106_300, 0));

        // secondary recovers
        s.down.store(false, Ordering::SeqCst);
        let q = oracle.get_rate(AssetClass::Btc).await.unwrap();
        assert_eq!(q.source, QuoteSource::Secondary);
        assert_eq!(q.usd_rate, Decimal::new(59_000, 0));

        // both down again after ttl -> stale cache, not floor
        s.down.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        let q = oracle.get_rate(AssetClass::Btc).await.unwrap();
        assert_eq!(q.source, QuoteSource::Cache);
        assert_eq!(q.usd_rate, Decimal::new(59_000, 0));
        assert!(oracle.snapshot()[0].stale);
    }

    #[tokio::test]
    async fn no_floor_configured_is_an_error() {
        let oracle = PriceOracle::new(
            FakeSource::down("p"),
            FakeSource::down("s"),
            Duration::from_secs(60),
            BTreeMap::new(),
        );
        assert!(matches!(
            oracle.get_rate(AssetClass::Sol).await,
            Err(OracleError::NoPriceAvailable(PriceKey::Sol))
        ));
    }

    #[tokio::test]
    async fn concurrent_misses_issue_one_request() {
        let p = Arc::new(FakeSource {
            name: "slow",
            rate: Decimal::new(216, 0),
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        });
        let oracle = Arc::new(PriceOracle::new(
            p.clone(),
            FakeSource::down("s"),
            Duration::from_secs(60),
            floors(),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let o = oracle.clone();
            handles.push(tokio::spawn(async move { o.get_rate(AssetClass::Sol).await.unwrap() }));
        }
        let mut rates = Vec::new();
        for h in handles {
            rates.push(h.await.unwrap().usd_rate);
        }
        assert!(rates.iter().all(|r| *r == Decimal::new(216, 0)));
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }
}
