//! Solana JSON-RPC: `getSignaturesForAddress`, then `getTransaction` per
//! signature. Each signature costs one RPC call, so signatures are resolved
//! lazily as the matcher pulls from the stream.

use chrono::{DateTime, Utc};
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    log_degraded, ts_secs, AmountPolicy, CandidateTransfer, ChainAdapter, TransferStream,
    PAGE_SIZE,
};
use crate::asset::{AssetClass, Chain, ChainFamily};
use crate::errors::UpstreamError;
use crate::upstream::{host_key, UpstreamClient};
use crate::util::decimal::from_base_units;

pub struct SolanaAdapter {
    client: UpstreamClient,
    rpc_url: String,
    presence_only: bool,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct SignatureInfo {
    signature: String,
    #[serde(rename = "blockTime", default)]
    block_time: Option<i64>,
    #[serde(default)]
    err: Option<Value>,
}

/// Positive lamport delta of `address` in a `getTransaction` result.
/// `Some(None)`: the address is not in the account list (amount unknown).
/// `None`: the balance did not go up, so this is not an inbound transfer.
fn lamport_delta(tx: &Value, address: &str) -> Option<Option<i128>> {
    let message = &tx["transaction"]["message"];
    let mut keys: Vec<&str> = message["accountKeys"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|k| k.as_str().or_else(|| k["pubkey"].as_str()))
                .collect()
        })
        .unwrap_or_default();
    for part in ["writable", "readonly"] {
        if let Some(extra) = tx["meta"]["loadedAddresses"][part].as_array() {
            keys.extend(extra.iter().filter_map(Value::as_str));
        }
    }

    let Some(idx) = keys.iter().position(|k| *k == address) else {
        return Some(None);
    };
    let pre = tx["meta"]["preBalances"][idx].as_i64();
    let post = tx["meta"]["postBalances"][idx].as_i64();
    match (pre, post) {
        (Some(pre), Some(post)) if post > pre => Some(Some(i128::from(post - pre))),
        (Some(_), Some(_)) => None,
        _ => Some(None),
    }
}

impl SolanaAdapter {
    pub fn new(client: UpstreamClient, rpc_url: impl Into<String>, presence_only: bool) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            presence_only,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let reply: RpcReply = self.client.post_json(&self.rpc_url, &body).await?;
        if let Some(err) = reply.error.filter(|e| !e.is_null()) {
            return Err(UpstreamError::malformed(host_key(&self.rpc_url), err));
        }
        Ok(reply.result)
    }

    async fn signatures(&self, address: &str, since: DateTime<Utc>) -> Vec<SignatureInfo> {
        let result = match self
            .rpc("getSignaturesForAddress", json!([address, {"limit": PAGE_SIZE}]))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log_degraded(Chain::Solana, &e);
                return Vec::new();
            }
        };
        let sigs: Vec<SignatureInfo> = match serde_json::from_value(result) {
            Ok(s) => s,
            Err(e) => {
                log_degraded(Chain::Solana, &UpstreamError::malformed(host_key(&self.rpc_url), e));
                return Vec::new();
            }
        };
        // RPC returns newest first already.
        sigs.into_iter()
            .filter(|s| s.err.as_ref().map_or(true, Value::is_null))
            .filter(|s| s.block_time.and_then(ts_secs).map_or(false, |t| t >= since))
            .collect()
    }

    async fn resolve(&self, address: &str, sig: SignatureInfo) -> Option<CandidateTransfer> {
        let timestamp = sig.block_time.and_then(ts_secs)?;
        let presence = CandidateTransfer {
            tx_id: sig.signature.clone(),
            to_address: address.to_string(),
            amount_asset: None,
            timestamp,
            raw_memo: None,
        };

        let tx = match self
            .rpc(
                "getTransaction",
                json!([sig.signature, {"encoding": "json", "maxSupportedTransactionVersion": 0}]),
            )
            .await
        {
            Ok(tx) if !tx.is_null() => tx,
            Ok(_) => return Some(presence),
            Err(e) => {
                log_degraded(Chain::Solana, &e);
                return Some(presence);
            }
        };
        if !tx["meta"]["err"].is_null() {
            return None;
        }
        let lamports = lamport_delta(&tx, address)?;
        Some(CandidateTransfer {
            amount_asset: lamports
                .and_then(|l| from_base_units(l, AssetClass::Sol.base_unit_decimals())),
            ..presence
        })
    }
}

impl ChainAdapter for SolanaAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    fn amount_policy(&self) -> AmountPolicy {
        if self.presence_only {
            AmountPolicy::PresenceOnly
        } else {
            AmountPolicy::Exact
        }
    }

    fn list_inbound_transfers<'a>(
        &'a self,
        _asset: AssetClass,
        address: &'a str,
        since: DateTime<Utc>,
    ) -> TransferStream<'a> {
        stream::once(self.signatures(address, since))
            .flat_map(stream::iter)
            .then(move |sig| self.resolve(address, sig))
            .filter_map(future::ready)
            .boxed()
    }
}
