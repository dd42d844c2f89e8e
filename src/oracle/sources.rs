//! Concrete USD quote sources.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::asset::PriceKey;
use crate::errors::UpstreamError;
use crate::upstream::{host_key, UpstreamClient};
use crate::util::decimal::{json_decimal, parse_decimal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Binance,
    CryptoCompare,
    CoinGecko,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Binance => "binance",
            SourceKind::CryptoCompare => "cryptocompare",
            SourceKind::CoinGecko => "coingecko",
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(SourceKind::Binance),
            "cryptocompare" => Ok(SourceKind::CryptoCompare),
            "coingecko" => Ok(SourceKind::CoinGecko),
            other => Err(format!("unknown price source {other:?}")),
        }
    }
}

/// A single upstream that can quote a USD rate for a price family.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, key: PriceKey) -> Result<Decimal, UpstreamError>;
}

fn positive(host: &str, rate: Option<Decimal>) -> Result<Decimal, UpstreamError> {
    match rate {
        Some(r) if r > Decimal::ZERO => Ok(r),
        Some(r) => Err(UpstreamError::malformed(host, format!("non-positive rate {r}"))),
        None => Err(UpstreamError::malformed(host, "rate missing or not a number")),
    }
}

/// `GET /api/v3/ticker/price?symbol=BTCUSDT -> {"symbol": "...", "price": "67000.1"}`
pub struct BinanceSource {
    client: UpstreamClient,
    base_url: String,
}

#[derive(Deserialize)]
struct BinanceTicker {
    price: String,
}

impl BinanceSource {
    pub fn new(client: UpstreamClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceSource for BinanceSource {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn fetch(&self, key: PriceKey) -> Result<Decimal, UpstreamError> {
        // Binance quotes everything against USDT, so USDT itself is the peg.
        let Some(symbol) = key.binance_symbol() else {
            return Ok(Decimal::ONE);
        };
        let url = format!("{}/api/v3/ticker/price", self.base_url.trim_end_matches('/'));
        let ticker: BinanceTicker = self
            .client
            .get_json(&url, &[("symbol", symbol.to_string())], &[])
            .await?;
        positive(&host_key(&url), parse_decimal(&ticker.price))
    }
}

/// `GET /data/price?fsym=BTC&tsyms=USD -> {"USD": 67000.1}`
pub struct CryptoCompareSource {
    client: UpstreamClient,
    base_url: String,
}

impl CryptoCompareSource {
    pub fn new(client: UpstreamClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceSource for CryptoCompareSource {
    fn name(&self) -> &'static str {
        "cryptocompare"
    }

    async fn fetch(&self, key: PriceKey) -> Result<Decimal, UpstreamError> {
        let url = format!("{}/data/price", self.base_url.trim_end_matches('/'));
        let body: Value = self
            .client
            .get_json(
                &url,
                &[("fsym", key.as_str().to_string()), ("tsyms", "USD".to_string())],
                &[],
            )
            .await?;
        // Errors come back as 200 {"Response": "Error", "Message": ...}
        if body.get("Response").and_then(Value::as_str) == Some("Error") {
            let msg = body.get("Message").and_then(Value::as_str).unwrap_or("error");
            return Err(UpstreamError::malformed(host_key(&url), msg));
        }
        positive(&host_key(&url), body.get("USD").and_then(json_decimal))
    }
}

/// `GET /api/v3/simple/price?ids=bitcoin&vs_currencies=usd -> {"bitcoin": {"usd": 67000}}`
pub struct CoinGeckoSource {
    client: UpstreamClient,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(client: UpstreamClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch(&self, key: PriceKey) -> Result<Decimal, UpstreamError> {
        let url = format!("{}/api/v3/simple/price", self.base_url.trim_end_matches('/'));
        let id = key.coingecko_id();
        let body: HashMap<String, HashMap<String, Value>> = self
            .client
            .get_json(
                &url,
                &[("ids", id.to_string()), ("vs_currencies", "usd".to_string())],
                &[],
            )
            .await?;
        let rate = body
            .get(id)
            .and_then(|m| m.get("usd"))
            .and_then(json_decimal);
        positive(&host_key(&url), rate)
    }
}

pub fn build_source(
    kind: SourceKind,
    client: UpstreamClient,
    cfg: &super::OracleConfig,
) -> Arc<dyn PriceSource> {
    match kind {
        SourceKind::Binance => Arc::new(BinanceSource::new(client, cfg.binance_url.clone())),
        SourceKind::CryptoCompare => {
            Arc::new(CryptoCompareSource::new(client, cfg.cryptocompare_url.clone()))
        }
        SourceKind::CoinGecko => Arc::new(CoinGeckoSource::new(client, cfg.coingecko_url.clone())),
    }
}
