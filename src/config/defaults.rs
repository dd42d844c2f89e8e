//! Built-in endpoint, contract and price-floor defaults.

use rust_decimal::Decimal;

use crate::asset::{AssetClass, Chain, PriceKey};

pub const DEFAULT_CONFIG_PATH: &str = "reconciler.toml";
pub const DEFAULT_DB_PATH: &str = "./reconciler-data";
pub const DEFAULT_BIND: &str = "127.0.0.1:8088";

pub const POLL_INTERVAL_SECS: u64 = 120;
pub const HORIZON_HOURS: u64 = 48;
pub const WORKER_CONCURRENCY: u64 = 4;
pub const PER_PAYMENT_DELAY_MS: u64 = 2_000;
pub const HTTP_TIMEOUT_MS: u64 = 8_000;
pub const PER_HOST_CONCURRENCY: u64 = 2;
pub const PER_HOST_SPACING_MS: u64 = 250;
pub const PRICE_TTL_SECS: u64 = 180;

pub const STABLE_TOLERANCE: &str = "0.02";
pub const VOLATILE_TOLERANCE: &str = "0.05";
pub const MIN_DEPOSIT_USD: &str = "1";

pub const BINANCE_URL: &str = "https://api.binance.com";
pub const CRYPTOCOMPARE_URL: &str = "https://min-api.cryptocompare.com";
pub const COINGECKO_URL: &str = "https://api.coingecko.com";

pub const BLOCKCHAIN_INFO_URL: &str = "https://blockchain.info";
pub const SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const TRONSCAN_URL: &str = "https://apilist.tronscanapi.com";
pub const TONCENTER_V2_URL: &str = "https://toncenter.com/api/v2";
pub const TONCENTER_V3_URL: &str = "https://toncenter.com/api/v3";
pub const TONAPI_URL: &str = "https://tonapi.io/v2";

/// Explorer API base for an EVM chain.
pub fn evm_explorer_url(chain: Chain) -> Option<&'static str> {
    match chain {
        Chain::Ethereum => Some("https://api.etherscan.io/api"),
        Chain::Bsc => Some("https://api.bscscan.com/api"),
        Chain::Base => Some("https://api.basescan.org/api"),
        Chain::Optimism => Some("https://api-optimistic.etherscan.io/api"),
        Chain::Arbitrum => Some("https://api.arbiscan.io/api"),
        _ => None,
    }
}

/// Canonical USDT contract per token asset.
pub fn usdt_contract(asset: AssetClass) -> Option<&'static str> {
    match asset {
        AssetClass::UsdtErc20 => Some("0xdac17f958d2ee523a2206206994597c13d831ec7"),
        AssetClass::UsdtBep20 => Some("0x55d398326f99059ff775485246999027b3197955"),
        AssetClass::UsdtBase => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        AssetClass::UsdtOptimism => Some("0x94b008aA00579c1307B0EF2c499aD98a8ce58e58"),
        AssetClass::UsdtArbitrum => Some("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
        AssetClass::UsdtTrc20 => Some("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"),
        _ => None,
    }
}

/// Operator floor rates used when every source and the cache are empty.
pub fn fallback_rate(key: PriceKey) -> Decimal {
    match key {
        PriceKey::Btc => Decimal::new(106_300, 0),
        PriceKey::Eth => Decimal::new(3_903, 0),
        PriceKey::Bnb => Decimal::new(703, 0),
        PriceKey::Sol => Decimal::new(216, 0),
        PriceKey::Trx => Decimal::new(2_456, 4),
        PriceKey::Ton => Decimal::new(550, 2),
        PriceKey::Usdt => Decimal::ONE,
    }
}
