//! Chain adapters: one implementation per chain family, all behind
//! [`ChainAdapter`]. Adapters are pure queries; they never touch storage.
//!
//! Every adapter turns upstream failures (timeouts, non-2xx, malformed JSON)
//! into an empty stream plus a throttled warning, so a flaky explorer costs
//! one payment one cycle and nothing more.

pub mod evm;
pub mod solana;
pub mod ton;
pub mod tron;
pub mod utxo;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::asset::{AssetClass, Chain, ChainFamily};
use crate::errors::UpstreamError;
use crate::upstream::UpstreamClient;
use crate::util::warn_throttled;

/// An inbound transfer observed on chain. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTransfer {
    pub tx_id: String,
    pub to_address: String,
    /// `None` when the adapter saw the transfer but could not derive an amount.
    pub amount_asset: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub raw_memo: Option<String>,
}

/// Lazy, newest-first, finite sequence of candidates.
pub type TransferStream<'a> = BoxStream<'a, CandidateTransfer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountPolicy {
    /// A parsed amount is required and checked against the tolerance band.
    Exact,
    /// A candidate with an unknown amount matches on presence alone.
    PresenceOnly,
}

pub trait ChainAdapter: Send + Sync {
    fn family(&self) -> ChainFamily;

    fn supports_memo(&self) -> bool {
        false
    }

    fn amount_policy(&self) -> AmountPolicy {
        AmountPolicy::Exact
    }

    /// Inbound transfers of `asset` to `address` at or after `since`.
    fn list_inbound_transfers<'a>(
        &'a self,
        asset: AssetClass,
        address: &'a str,
        since: DateTime<Utc>,
    ) -> TransferStream<'a>;
}

#[derive(Debug, Clone)]
pub struct EvmEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

/// Explorer/RPC locations and token contracts for every supported chain.
#[derive(Debug, Clone)]
pub struct ChainEndpoints {
    pub evm: BTreeMap<Chain, EvmEndpoint>,
    pub contracts: HashMap<AssetClass, String>,
    pub blockchain_info_url: String,
    pub solana_rpc_url: String,
    pub tronscan_url: String,
    pub toncenter_v2_url: String,
    pub toncenter_v3_url: String,
    pub tonapi_url: String,
    pub ton_api_key: Option<String>,
}

/// Maximum transactions requested from any explorer in one query.
pub const PAGE_SIZE: usize = 100;

const WARN_PERIOD: Duration = Duration::from_secs(300);

/// Stream that runs `fetch` on first poll and yields its items.
pub(crate) fn from_fetch<'a, F>(fetch: F) -> TransferStream<'a>
where
    F: Future<Output = Vec<CandidateTransfer>> + Send + 'a,
{
    stream::once(fetch).flat_map(stream::iter).boxed()
}

/// Log an upstream failure, throttled per chain + host. Callers then carry
/// on as if the explorer returned nothing.
pub(crate) fn log_degraded(chain: Chain, err: &UpstreamError) {
    warn_throttled(
        format!("chain:{}:{}", chain, err.host()),
        WARN_PERIOD,
        format!("{} explorer query failed, treating as no data: {}", chain, err),
    );
}

/// Newest first, then drop anything older than `since`.
pub(crate) fn finalize(mut v: Vec<CandidateTransfer>, since: DateTime<Utc>) -> Vec<CandidateTransfer> {
    v.retain(|c| c.timestamp >= since);
    v.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    v.truncate(PAGE_SIZE * 2);
    v
}

pub(crate) fn ts_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

pub(crate) fn ts_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Asset class -> adapter lookup. Adding a chain means registering one more
/// adapter here.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<AssetClass, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, asset: AssetClass, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(asset, adapter);
    }

    pub fn get(&self, asset: AssetClass) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(&asset).cloned()
    }

    pub fn supported(&self) -> Vec<AssetClass> {
        let mut v: Vec<_> = self.adapters.keys().copied().collect();
        v.sort();
        v
    }

    /// Registry with every built-in adapter wired to `endpoints`.
    pub fn from_endpoints(
        endpoints: &ChainEndpoints,
        client: UpstreamClient,
        solana_presence_only: bool,
    ) -> Self {
        let mut reg = Self::new();

        let mut evm_by_chain: HashMap<Chain, Arc<dyn ChainAdapter>> = HashMap::new();
        for (chain, ep) in &endpoints.evm {
            evm_by_chain.insert(
                *chain,
                Arc::new(evm::EvmAdapter::new(
                    *chain,
                    client.clone(),
                    ep.clone(),
                    endpoints.contracts.clone(),
                )),
            );
        }
        let utxo: Arc<dyn ChainAdapter> = Arc::new(utxo::UtxoAdapter::new(
            client.clone(),
            endpoints.blockchain_info_url.clone(),
        ));
        let sol: Arc<dyn ChainAdapter> = Arc::new(solana::SolanaAdapter::new(
            client.clone(),
            endpoints.solana_rpc_url.clone(),
            solana_presence_only,
        ));
        let tron: Arc<dyn ChainAdapter> = Arc::new(tron::TronAdapter::new(
            client.clone(),
            endpoints.tronscan_url.clone(),
            endpoints.contracts.get(&AssetClass::UsdtTrc20).cloned(),
        ));
        let ton: Arc<dyn ChainAdapter> = Arc::new(ton::TonAdapter::new(
            client,
            ton::TonEndpoints {
                toncenter_v2: endpoints.toncenter_v2_url.clone(),
                toncenter_v3: endpoints.toncenter_v3_url.clone(),
                tonapi: endpoints.tonapi_url.clone(),
                api_key: endpoints.ton_api_key.clone(),
            },
        ));

        for asset in AssetClass::ALL {
            let adapter = match asset.family() {
                ChainFamily::Evm => evm_by_chain.get(&asset.chain()).cloned(),
                ChainFamily::Utxo => Some(utxo.clone()),
                ChainFamily::Solana => Some(sol.clone()),
                ChainFamily::Tron => Some(tron.clone()),
                ChainFamily::Ton => Some(ton.clone()),
            };
            if let Some(a) = adapter {
                reg.register(asset, a);
            }
        }
        reg
    }
}
