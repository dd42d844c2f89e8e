//! Etherscan-compatible explorers (Ethereum, BSC, Base, Optimism, Arbitrum).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::{
    finalize, from_fetch, log_degraded, ts_secs, CandidateTransfer, ChainAdapter, EvmEndpoint,
    TransferStream, PAGE_SIZE,
};
use crate::asset::{AssetClass, Chain, ChainFamily};
use crate::errors::UpstreamError;
use crate::upstream::{host_key, UpstreamClient};
use crate::util::decimal::json_base_units;

pub struct EvmAdapter {
    chain: Chain,
    client: UpstreamClient,
    endpoint: EvmEndpoint,
    contracts: HashMap<AssetClass, String>,
}

#[derive(Debug, Deserialize)]
struct ExplorerReply {
    status: Option<String>,
    message: Option<String>,
    #[serde(default)]
    result: Value,
}

/// One row of `txlist` or `tokentx`.
#[derive(Debug, Deserialize)]
struct ExplorerTx {
    hash: String,
    #[serde(default)]
    to: String,
    value: Value,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    #[serde(rename = "isError", default)]
    is_error: Option<String>,
    #[serde(rename = "contractAddress", default)]
    contract_address: Option<String>,
    #[serde(rename = "tokenDecimal", default)]
    token_decimal: Option<String>,
}

#[derive(Clone, Copy)]
enum SubQuery {
    Native,
    Token,
}

impl SubQuery {
    fn action(&self) -> &'static str {
        match self {
            SubQuery::Native => "txlist",
            SubQuery::Token => "tokentx",
        }
    }
}

/// Entry tagged with the token contract it moved (None for native value).
struct Tagged {
    candidate: CandidateTransfer,
    contract: Option<String>,
    failed: bool,
}

impl EvmAdapter {
    pub fn new(
        chain: Chain,
        client: UpstreamClient,
        endpoint: EvmEndpoint,
        contracts: HashMap<AssetClass, String>,
    ) -> Self {
        Self {
            chain,
            client,
            endpoint,
            contracts,
        }
    }

    async fn query(
        &self,
        kind: SubQuery,
        address: &str,
        contract: Option<&str>,
    ) -> Result<Vec<ExplorerTx>, UpstreamError> {
        let mut q = vec![
            ("module", "account".to_string()),
            ("action", kind.action().to_string()),
            ("address", address.to_string()),
            ("page", "1".to_string()),
            ("offset", PAGE_SIZE.to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(c) = contract {
            q.push(("contractaddress", c.to_string()));
        }
        if let Some(key) = &self.endpoint.api_key {
            q.push(("apikey", key.clone()));
        }
        let reply: ExplorerReply = self.client.get_json(&self.endpoint.url, &q, &[]).await?;
        parse_reply(&host_key(&self.endpoint.url), reply)
    }

    fn tag(&self, kind: SubQuery, asset: AssetClass, tx: ExplorerTx) -> Option<Tagged> {
        let decimals = match kind {
            SubQuery::Native => asset.base_unit_decimals(),
            SubQuery::Token => tx
                .token_decimal
                .as_deref()
                .and_then(|d| d.parse().ok())
                .unwrap_or(asset.base_unit_decimals()),
        };
        let timestamp = ts_secs(tx.time_stamp.parse().ok()?)?;
        Some(Tagged {
            candidate: CandidateTransfer {
                tx_id: tx.hash,
                to_address: tx.to,
                amount_asset: json_base_units(&tx.value, decimals),
                timestamp,
                raw_memo: None,
            },
            contract: match kind {
                SubQuery::Native => None,
                SubQuery::Token => tx.contract_address,
            },
            failed: tx.is_error.as_deref() == Some("1"),
        })
    }

    async fn fetch(
        &self,
        asset: AssetClass,
        address: &str,
        since: DateTime<Utc>,
    ) -> Vec<CandidateTransfer> {
        let want_contract = if asset.is_token() {
            match self.contracts.get(&asset) {
                Some(c) => Some(c.as_str()),
                None => {
                    tracing::warn!(chain = %self.chain, asset = %asset, "no token contract configured");
                    return Vec::new();
                }
            }
        } else {
            None
        };

        let kind = if asset.is_token() {
            SubQuery::Token
        } else {
            SubQuery::Native
        };
        let tagged: Vec<Tagged> = match self.query(kind, address, want_contract).await {
            Ok(rows) => rows.into_iter().filter_map(|tx| self.tag(kind, asset, tx)).collect(),
            Err(e) => {
                log_degraded(self.chain, &e);
                Vec::new()
            }
        };

        let merged = tagged
            .into_iter()
            .filter(|t| !t.failed)
            .filter(|t| t.candidate.to_address.eq_ignore_ascii_case(address))
            .filter(|t| match (&t.contract, want_contract) {
                (None, None) => true,
                (Some(have), Some(want)) => have.eq_ignore_ascii_case(want),
                _ => false,
            })
            .map(|t| t.candidate)
            .collect();
        finalize(merged, since)
    }
}

/// Etherscan answers `status: "0"` both for "no transactions" (empty array)
/// and for real errors (string result such as a rate-limit notice).
fn parse_reply(host: &str, reply: ExplorerReply) -> Result<Vec<ExplorerTx>, UpstreamError> {
    match reply.result {
        Value::Array(rows) => Ok(rows
            .into_iter()
            .filter_map(|r| serde_json::from_value::<ExplorerTx>(r).ok())
            .collect()),
        Value::String(s) => Err(UpstreamError::malformed(
            host,
            format!(
                "status={} message={} result={}",
                reply.status.unwrap_or_default(),
                reply.message.unwrap_or_default(),
                s
            ),
        )),
        other => Err(UpstreamError::malformed(host, format!("unexpected result: {other}"))),
    }
}

impl ChainAdapter for EvmAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn list_inbound_transfers<'a>(
        &'a self,
        asset: AssetClass,
        address: &'a str,
        since: DateTime<Utc>,
    ) -> TransferStream<'a> {
        from_fetch(self.fetch(asset, address, since))
    }
}
