//! Supported asset classes (chain + token pairs) and their static properties.
//!
//! Everything chain-specific that is not an endpoint lives here: which adapter
//! family serves an asset, which price quote it shares, how tight its matching
//! band is and how amounts are rounded for display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Adapter family. One `ChainAdapter` implementation exists per family.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Utxo,
    Solana,
    Tron,
    Ton,
}

/// Concrete network an asset lives on.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Bsc,
    Base,
    Optimism,
    Arbitrum,
    Solana,
    Tron,
    Ton,
}

impl Chain {
    pub const ALL: [Chain; 9] = [
        Chain::Bitcoin,
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Base,
        Chain::Optimism,
        Chain::Arbitrum,
        Chain::Solana,
        Chain::Tron,
        Chain::Ton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::Bsc => "bsc",
            Chain::Base => "base",
            Chain::Optimism => "optimism",
            Chain::Arbitrum => "arbitrum",
            Chain::Solana => "solana",
            Chain::Tron => "tron",
            Chain::Ton => "ton",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Bitcoin => ChainFamily::Utxo,
            Chain::Ethereum | Chain::Bsc | Chain::Base | Chain::Optimism | Chain::Arbitrum => {
                ChainFamily::Evm
            }
            Chain::Solana => ChainFamily::Solana,
            Chain::Tron => ChainFamily::Tron,
            Chain::Ton => ChainFamily::Ton,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized quote key. All EVM variants of a token share one quote.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceKey {
    Btc,
    Eth,
    Bnb,
    Sol,
    Trx,
    Ton,
    Usdt,
}

impl PriceKey {
    pub const ALL: [PriceKey; 7] = [
        PriceKey::Btc,
        PriceKey::Eth,
        PriceKey::Bnb,
        PriceKey::Sol,
        PriceKey::Trx,
        PriceKey::Ton,
        PriceKey::Usdt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceKey::Btc => "BTC",
            PriceKey::Eth => "ETH",
            PriceKey::Bnb => "BNB",
            PriceKey::Sol => "SOL",
            PriceKey::Trx => "TRX",
            PriceKey::Ton => "TON",
            PriceKey::Usdt => "USDT",
        }
    }

    /// Binance spot symbol against USDT. `None` for USDT itself (pegged).
    pub fn binance_symbol(&self) -> Option<&'static str> {
        match self {
            PriceKey::Btc => Some("BTCUSDT"),
            PriceKey::Eth => Some("ETHUSDT"),
            PriceKey::Bnb => Some("BNBUSDT"),
            PriceKey::Sol => Some("SOLUSDT"),
            PriceKey::Trx => Some("TRXUSDT"),
            PriceKey::Ton => Some("TONUSDT"),
            PriceKey::Usdt => None,
        }
    }

    pub fn coingecko_id(&self) -> &'static str {
        match self {
            PriceKey::Btc => "bitcoin",
            PriceKey::Eth => "ethereum",
            PriceKey::Bnb => "binancecoin",
            PriceKey::Sol => "solana",
            PriceKey::Trx => "tron",
            PriceKey::Ton => "the-open-network",
            PriceKey::Usdt => "tether",
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tolerance class: stable-value tokens get a tighter band than volatile coins.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ValueClass {
    Stable,
    Volatile,
}

/// A (chain, token) pair a user may pay with.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Btc,
    Eth,
    EthBase,
    EthOptimism,
    EthArbitrum,
    Bnb,
    UsdtErc20,
    UsdtBep20,
    UsdtBase,
    UsdtOptimism,
    UsdtArbitrum,
    Sol,
    Trx,
    UsdtTrc20,
    Ton,
}

impl AssetClass {
    pub const ALL: [AssetClass; 15] = [
        AssetClass::Btc,
        AssetClass::Eth,
        AssetClass::EthBase,
        AssetClass::EthOptimism,
        AssetClass::EthArbitrum,
        AssetClass::Bnb,
        AssetClass::UsdtErc20,
        AssetClass::UsdtBep20,
        AssetClass::UsdtBase,
        AssetClass::UsdtOptimism,
        AssetClass::UsdtArbitrum,
        AssetClass::Sol,
        AssetClass::Trx,
        AssetClass::UsdtTrc20,
        AssetClass::Ton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Btc => "BTC",
            AssetClass::Eth => "ETH",
            AssetClass::EthBase => "ETH_BASE",
            AssetClass::EthOptimism => "ETH_OPTIMISM",
            AssetClass::EthArbitrum => "ETH_ARBITRUM",
            AssetClass::Bnb => "BNB",
            AssetClass::UsdtErc20 => "USDT_ERC20",
            AssetClass::UsdtBep20 => "USDT_BEP20",
            AssetClass::UsdtBase => "USDT_BASE",
            AssetClass::UsdtOptimism => "USDT_OPTIMISM",
            AssetClass::UsdtArbitrum => "USDT_ARBITRUM",
            AssetClass::Sol => "SOL",
            AssetClass::Trx => "TRX",
            AssetClass::UsdtTrc20 => "USDT_TRC20",
            AssetClass::Ton => "TON",
        }
    }

    pub fn chain(&self) -> Chain {
        match self {
            AssetClass::Btc => Chain::Bitcoin,
            AssetClass::Eth | AssetClass::UsdtErc20 => Chain::Ethereum,
            AssetClass::EthBase | AssetClass::UsdtBase => Chain::Base,
            AssetClass::EthOptimism | AssetClass::UsdtOptimism => Chain::Optimism,
            AssetClass::EthArbitrum | AssetClass::UsdtArbitrum => Chain::Arbitrum,
            AssetClass::Bnb | AssetClass::UsdtBep20 => Chain::Bsc,
            AssetClass::Sol => Chain::Solana,
            AssetClass::Trx | AssetClass::UsdtTrc20 => Chain::Tron,
            AssetClass::Ton => Chain::Ton,
        }
    }

    pub fn family(&self) -> ChainFamily {
        self.chain().family()
    }

    pub fn price_key(&self) -> PriceKey {
        match self {
            AssetClass::Btc => PriceKey::Btc,
            AssetClass::Eth
            | AssetClass::EthBase
            | AssetClass::EthOptimism
            | AssetClass::EthArbitrum => PriceKey::Eth,
            AssetClass::Bnb => PriceKey::Bnb,
            AssetClass::Sol => PriceKey::Sol,
            AssetClass::Trx => PriceKey::Trx,
            AssetClass::Ton => PriceKey::Ton,
            AssetClass::UsdtErc20
            | AssetClass::UsdtBep20
            | AssetClass::UsdtBase
            | AssetClass::UsdtOptimism
            | AssetClass::UsdtArbitrum
            | AssetClass::UsdtTrc20 => PriceKey::Usdt,
        }
    }

    pub fn value_class(&self) -> ValueClass {
        match self.price_key() {
            PriceKey::Usdt => ValueClass::Stable,
            _ => ValueClass::Volatile,
        }
    }

    /// True for contract tokens, false for the chain's native coin.
    pub fn is_token(&self) -> bool {
        matches!(
            self,
            AssetClass::UsdtErc20
                | AssetClass::UsdtBep20
                | AssetClass::UsdtBase
                | AssetClass::UsdtOptimism
                | AssetClass::UsdtArbitrum
                | AssetClass::UsdtTrc20
        )
    }

    /// Chains where payers attach a comment that identifies the deposit.
    pub fn supports_memo(&self) -> bool {
        matches!(self, AssetClass::Ton)
    }

    /// Decimals of the on-chain base unit for native coins; token decimals
    /// are normally reported by the explorer and this is only the fallback.
    pub fn base_unit_decimals(&self) -> u32 {
        match self {
            AssetClass::Btc => 8,
            AssetClass::Eth
            | AssetClass::EthBase
            | AssetClass::EthOptimism
            | AssetClass::EthArbitrum
            | AssetClass::Bnb => 18,
            AssetClass::UsdtBep20 => 18,
            AssetClass::UsdtErc20
            | AssetClass::UsdtBase
            | AssetClass::UsdtOptimism
            | AssetClass::UsdtArbitrum
            | AssetClass::UsdtTrc20 => 6,
            AssetClass::Sol => 9,
            AssetClass::Trx => 6,
            AssetClass::Ton => 9,
        }
    }

    /// Decimals the quoted asset amount is rounded to when shown to a payer.
    pub fn display_decimals(&self) -> u32 {
        match self {
            AssetClass::Btc => 8,
            AssetClass::Trx | AssetClass::Ton => 2,
            a if a.value_class() == ValueClass::Stable => 2,
            _ => 6,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AssetClass::Btc => "Bitcoin",
            AssetClass::Eth => "Ethereum (Mainnet)",
            AssetClass::EthBase => "Ethereum (Base)",
            AssetClass::EthOptimism => "Ethereum (Optimism)",
            AssetClass::EthArbitrum => "Ethereum (Arbitrum)",
            AssetClass::Bnb => "BNB (BSC)",
            AssetClass::UsdtErc20 => "USDT (Ethereum)",
            AssetClass::UsdtBep20 => "USDT (BSC)",
            AssetClass::UsdtBase => "USDT (Base)",
            AssetClass::UsdtOptimism => "USDT (Optimism)",
            AssetClass::UsdtArbitrum => "USDT (Arbitrum)",
            AssetClass::Sol => "Solana",
            AssetClass::Trx => "Tron",
            AssetClass::UsdtTrc20 => "USDT (Tron)",
            AssetClass::Ton => "Toncoin",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown asset class: {0}")]
pub struct UnknownAsset(pub String);

impl FromStr for AssetClass {
    type Err = UnknownAsset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        AssetClass::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| UnknownAsset(s.to_string()))
    }
}
