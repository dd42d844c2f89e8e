//! `reconciler.toml` loading and environment resolution.
//!
//! The file is a set of optional sections; `resolved()` layers environment
//! variables over it and falls back to the built-in defaults.

pub mod defaults;

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::asset::{AssetClass, Chain, PriceKey};
use crate::chains::{ChainEndpoints, EvmEndpoint};
use crate::deposits::DepositConfig;
use crate::errors::ConfigError;
use crate::matching::MatchConfig;
use crate::oracle::{OracleConfig, SourceKind};
use crate::upstream::UpstreamConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageCfg {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiCfg {
    pub bind: Option<String>,
    pub admin_token: Option<String>,
    /// Allowed browser origins; empty means no cross-origin access.
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkerCfg {
    pub interval_secs: Option<u64>,
    pub horizon_hours: Option<u64>,
    pub concurrency: Option<u64>,
    pub per_payment_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpCfg {
    pub timeout_ms: Option<u64>,
    pub per_host_concurrency: Option<u64>,
    pub per_host_spacing_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OracleCfg {
    pub ttl_secs: Option<u64>,
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub binance_url: Option<String>,
    pub cryptocompare_url: Option<String>,
    pub coingecko_url: Option<String>,
    /// Static floor rates keyed by quote family (`BTC = "106300"`).
    pub fallback: Option<HashMap<String, Decimal>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MatchingCfg {
    pub stable_tolerance: Option<Decimal>,
    pub volatile_tolerance: Option<Decimal>,
    pub solana_presence_only: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DepositsCfg {
    pub min_usd: Option<Decimal>,
}

/// Custodial receiving addresses per chain family.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WalletsCfg {
    pub bitcoin: Option<String>,
    pub evm: Option<String>,
    pub solana: Option<String>,
    pub tron: Option<String>,
    pub ton: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExplorersCfg {
    pub etherscan_url: Option<String>,
    pub etherscan_api_key: Option<String>,
    pub bscscan_url: Option<String>,
    pub bscscan_api_key: Option<String>,
    pub basescan_url: Option<String>,
    pub basescan_api_key: Option<String>,
    pub optimism_url: Option<String>,
    pub optimism_api_key: Option<String>,
    pub arbiscan_url: Option<String>,
    pub arbiscan_api_key: Option<String>,
    pub blockchain_info_url: Option<String>,
    pub solana_rpc_url: Option<String>,
    pub tronscan_url: Option<String>,
    pub toncenter_v2_url: Option<String>,
    pub toncenter_v3_url: Option<String>,
    pub tonapi_url: Option<String>,
    pub ton_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub storage: Option<StorageCfg>,
    pub api: Option<ApiCfg>,
    pub worker: Option<WorkerCfg>,
    pub http: Option<HttpCfg>,
    pub oracle: Option<OracleCfg>,
    pub matching: Option<MatchingCfg>,
    pub deposits: Option<DepositsCfg>,
    pub wallets: Option<WalletsCfg>,
    pub explorers: Option<ExplorersCfg>,
    /// Token contract overrides keyed by asset class (`USDT_BEP20 = "0x.."`).
    pub contracts: Option<HashMap<String, String>>,
}

/// Fully-resolved settings handed to each component.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub db_path: PathBuf,
    pub bind: String,
    pub admin_token: Option<String>,
    pub cors_origins: Vec<String>,
    pub worker: WorkerConfig,
    pub upstream: UpstreamConfig,
    pub oracle: OracleConfig,
    pub matching: MatchConfig,
    pub deposits: DepositConfig,
    pub endpoints: ChainEndpoints,
}

/// Environment lookup; injectable so resolution is testable without
/// mutating the process environment.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn u64(&self, key: &str, toml_opt: Option<u64>, default_: u64) -> u64 {
        self.string(key)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| toml_opt.unwrap_or(default_))
    }

    fn bool(&self, key: &str, toml_opt: Option<bool>, default_: bool) -> bool {
        self.string(key)
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or_else(|| toml_opt.unwrap_or(default_))
    }

    fn text(&self, key: &str, toml_opt: Option<String>, default_: &str) -> String {
        self.string(key)
            .or(toml_opt)
            .unwrap_or_else(|| default_.to_string())
    }

    fn opt(&self, key: &str, toml_opt: Option<String>) -> Option<String> {
        self.string(key).or(toml_opt).filter(|s| !s.is_empty())
    }

    fn decimal(&self, key: &str, toml_opt: Option<Decimal>, default_: &str) -> Result<Decimal, ConfigError> {
        if let Some(raw) = self.string(key) {
            return Decimal::from_str(&raw).map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }
        match toml_opt {
            Some(d) => Ok(d),
            None => Decimal::from_str(default_).map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl AppConfig {
    /// Parse `path`; a missing file yields the all-defaults config.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Default::default());
        }
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    pub fn resolved(&self) -> Result<ResolvedConfig, ConfigError> {
        self.resolved_with(&|k| std::env::var(k).ok())
    }

    pub fn resolved_with(
        &self,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, ConfigError> {
        use defaults as d;
        let env = Env(env);

        let storage = self.storage.clone().unwrap_or_default();
        let api = self.api.clone().unwrap_or_default();
        let w = self.worker.clone().unwrap_or_default();
        let h = self.http.clone().unwrap_or_default();
        let o = self.oracle.clone().unwrap_or_default();
        let m = self.matching.clone().unwrap_or_default();
        let dep = self.deposits.clone().unwrap_or_default();
        let wallets = self.wallets.clone().unwrap_or_default();
        let x = self.explorers.clone().unwrap_or_default();

        let worker = WorkerConfig {
            interval: Duration::from_secs(
                env.u64("RECONCILER_INTERVAL_SECS", w.interval_secs, d::POLL_INTERVAL_SECS)
                    .max(1),
            ),
            horizon: chrono::Duration::hours(
                env.u64("RECONCILER_HORIZON_HOURS", w.horizon_hours, d::HORIZON_HOURS) as i64,
            ),
            concurrency: env
                .u64("RECONCILER_CONCURRENCY", w.concurrency, d::WORKER_CONCURRENCY)
                .max(1) as usize,
            per_payment_delay: Duration::from_millis(env.u64(
                "RECONCILER_DELAY_MS",
                w.per_payment_delay_ms,
                d::PER_PAYMENT_DELAY_MS,
            )),
        };

        let upstream = UpstreamConfig {
            timeout: Duration::from_millis(
                env.u64("RECONCILER_HTTP_TIMEOUT_MS", h.timeout_ms, d::HTTP_TIMEOUT_MS)
                    .max(1),
            ),
            per_host_concurrency: env
                .u64(
                    "RECONCILER_PER_HOST_CONCURRENCY",
                    h.per_host_concurrency,
                    d::PER_HOST_CONCURRENCY,
                )
                .max(1) as usize,
            per_host_spacing: Duration::from_millis(env.u64(
                "RECONCILER_PER_HOST_SPACING_MS",
                h.per_host_spacing_ms,
                d::PER_HOST_SPACING_MS,
            )),
        };

        let source = |key: &str, raw: Option<String>, default_: SourceKind| {
            match env.string(key).or(raw) {
                Some(s) => SourceKind::from_str(&s).map_err(|reason| ConfigError::Invalid {
                    key: key.to_string(),
                    reason,
                }),
                None => Ok(default_),
            }
        };
        let mut fallback: BTreeMap<PriceKey, Decimal> =
            PriceKey::ALL.iter().map(|k| (*k, d::fallback_rate(*k))).collect();
        for (name, rate) in o.fallback.clone().unwrap_or_default() {
            let key = PriceKey::ALL
                .iter()
                .copied()
                .find(|k| k.as_str().eq_ignore_ascii_case(&name))
                .ok_or_else(|| ConfigError::Invalid {
                    key: format!("oracle.fallback.{name}"),
                    reason: "unknown quote family".into(),
                })?;
            if rate <= Decimal::ZERO {
                return Err(ConfigError::Invalid {
                    key: format!("oracle.fallback.{name}"),
                    reason: "rate must be positive".into(),
                });
            }
            fallback.insert(key, rate);
        }
        let oracle = OracleConfig {
            ttl: Duration::from_secs(env.u64("RECONCILER_PRICE_TTL_SECS", o.ttl_secs, d::PRICE_TTL_SECS)),
            primary: source("RECONCILER_PRICE_PRIMARY", o.primary.clone(), SourceKind::Binance)?,
            secondary: source(
                "RECONCILER_PRICE_SECONDARY",
                o.secondary.clone(),
                SourceKind::CryptoCompare,
            )?,
            binance_url: env.text("RECONCILER_BINANCE_URL", o.binance_url.clone(), d::BINANCE_URL),
            cryptocompare_url: env.text(
                "RECONCILER_CRYPTOCOMPARE_URL",
                o.cryptocompare_url.clone(),
                d::CRYPTOCOMPARE_URL,
            ),
            coingecko_url: env.text(
                "RECONCILER_COINGECKO_URL",
                o.coingecko_url.clone(),
                d::COINGECKO_URL,
            ),
            fallback,
        };

        let stable = env.decimal("RECONCILER_STABLE_TOLERANCE", m.stable_tolerance, d::STABLE_TOLERANCE)?;
        let volatile =
            env.decimal("RECONCILER_VOLATILE_TOLERANCE", m.volatile_tolerance, d::VOLATILE_TOLERANCE)?;
        for (key, t) in [("stable_tolerance", stable), ("volatile_tolerance", volatile)] {
            if t < Decimal::ZERO || t >= Decimal::ONE {
                return Err(ConfigError::Invalid {
                    key: format!("matching.{key}"),
                    reason: "tolerance must be in [0, 1)".into(),
                });
            }
        }
        let matching = MatchConfig {
            stable_tolerance: stable,
            volatile_tolerance: volatile,
            solana_presence_only: env.bool(
                "RECONCILER_SOLANA_PRESENCE_ONLY",
                m.solana_presence_only,
                false,
            ),
        };

        let family_wallets = [
            (Chain::Bitcoin, env.opt("RECONCILER_WALLET_BTC", wallets.bitcoin.clone())),
            (Chain::Ethereum, env.opt("RECONCILER_WALLET_EVM", wallets.evm.clone())),
            (Chain::Solana, env.opt("RECONCILER_WALLET_SOL", wallets.solana.clone())),
            (Chain::Tron, env.opt("RECONCILER_WALLET_TRON", wallets.tron.clone())),
            (Chain::Ton, env.opt("RECONCILER_WALLET_TON", wallets.ton.clone())),
        ];
        let mut wallet_map = HashMap::new();
        for asset in AssetClass::ALL {
            let wanted = match asset.chain() {
                Chain::Bsc | Chain::Base | Chain::Optimism | Chain::Arbitrum => Chain::Ethereum,
                c => c,
            };
            if let Some((_, Some(addr))) = family_wallets.iter().find(|(c, _)| *c == wanted) {
                wallet_map.insert(asset, addr.clone());
            }
        }
        let deposits = DepositConfig {
            min_usd: env.decimal("RECONCILER_MIN_DEPOSIT_USD", dep.min_usd, d::MIN_DEPOSIT_USD)?,
            wallets: wallet_map,
        };

        let etherscan_key = env.opt("ETHERSCAN_API_KEY", x.etherscan_api_key.clone());
        let evm_entry = |chain: Chain, url: Option<String>, key: Option<String>| {
            let url = url.or_else(|| d::evm_explorer_url(chain).map(str::to_string));
            url.map(|url| (chain, EvmEndpoint { url, api_key: key }))
        };
        let evm: BTreeMap<Chain, EvmEndpoint> = [
            evm_entry(Chain::Ethereum, x.etherscan_url.clone(), etherscan_key.clone()),
            evm_entry(
                Chain::Bsc,
                x.bscscan_url.clone(),
                env.opt("BSCSCAN_API_KEY", x.bscscan_api_key.clone()),
            ),
            evm_entry(
                Chain::Base,
                x.basescan_url.clone(),
                env.opt("BASESCAN_API_KEY", x.basescan_api_key.clone())
                    .or_else(|| etherscan_key.clone()),
            ),
            evm_entry(
                Chain::Optimism,
                x.optimism_url.clone(),
                env.opt("OPTIMISM_API_KEY", x.optimism_api_key.clone())
                    .or_else(|| etherscan_key.clone()),
            ),
            evm_entry(
                Chain::Arbitrum,
                x.arbiscan_url.clone(),
                env.opt("ARBISCAN_API_KEY", x.arbiscan_api_key.clone())
                    .or_else(|| etherscan_key.clone()),
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut contracts: HashMap<AssetClass, String> = AssetClass::ALL
            .iter()
            .filter_map(|a| d::usdt_contract(*a).map(|c| (*a, c.to_string())))
            .collect();
        for (name, addr) in self.contracts.clone().unwrap_or_default() {
            let asset = AssetClass::from_str(&name).map_err(|e| ConfigError::Invalid {
                key: format!("contracts.{name}"),
                reason: e.to_string(),
            })?;
            if !asset.is_token() {
                return Err(ConfigError::Invalid {
                    key: format!("contracts.{name}"),
                    reason: "not a token asset".into(),
                });
            }
            contracts.insert(asset, addr);
        }

        let endpoints = ChainEndpoints {
            evm,
            contracts,
            blockchain_info_url: env.text(
                "RECONCILER_BLOCKCHAIN_INFO_URL",
                x.blockchain_info_url.clone(),
                d::BLOCKCHAIN_INFO_URL,
            ),
            solana_rpc_url: env.text("SOLANA_RPC_URL", x.solana_rpc_url.clone(), d::SOLANA_RPC_URL),
            tronscan_url: env.text("RECONCILER_TRONSCAN_URL", x.tronscan_url.clone(), d::TRONSCAN_URL),
            toncenter_v2_url: env.text(
                "RECONCILER_TONCENTER_V2_URL",
                x.toncenter_v2_url.clone(),
                d::TONCENTER_V2_URL,
            ),
            toncenter_v3_url: env.text(
                "RECONCILER_TONCENTER_V3_URL",
                x.toncenter_v3_url.clone(),
                d::TONCENTER_V3_URL,
            ),
            tonapi_url: env.text("RECONCILER_TONAPI_URL", x.tonapi_url.clone(), d::TONAPI_URL),
            ton_api_key: env.opt("TON_API_KEY", x.ton_api_key.clone()),
        };

        Ok(ResolvedConfig {
            db_path: PathBuf::from(env.text("RECONCILER_DB_PATH", storage.db_path, d::DEFAULT_DB_PATH)),
            bind: env.text("RECONCILER_BIND", api.bind, d::DEFAULT_BIND),
            admin_token: env.opt("ADMIN_TOKEN", api.admin_token),
            cors_origins: match env.string("RECONCILER_CORS_ORIGINS") {
                Some(raw) => raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                None => api.cors_origins.unwrap_or_default(),
            },
            worker,
            upstream,
            oracle,
            matching,
            deposits,
            endpoints,
        })
    }
}
