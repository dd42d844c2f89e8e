//! TON via three interchangeable explorers: TonCenter v2, TonCenter v3 and
//! TonAPI. They are tried in that order. An answer with a memo-carrying
//! transfer wins; otherwise the next explorer is asked, since a lagging
//! index can miss a payment another one already has. When none carries a
//! memo, the first non-empty answer is used. Answers are never merged,
//! because the explorers encode hashes differently.
//!
//! Every explorer nests the payer's comment somewhere different in the
//! inbound message; [`extract_memo`] knows all the spots. The memo is
//! returned raw, decoding happens in the matcher.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    finalize, from_fetch, log_degraded, ts_secs, CandidateTransfer, ChainAdapter, TransferStream,
    PAGE_SIZE,
};
use crate::asset::{AssetClass, Chain, ChainFamily};
use crate::errors::UpstreamError;
use crate::upstream::{host_key, UpstreamClient};
use crate::util::decimal::json_base_units;

#[derive(Debug, Clone)]
pub struct TonEndpoints {
    pub toncenter_v2: String,
    pub toncenter_v3: String,
    pub tonapi: String,
    pub api_key: Option<String>,
}

pub struct TonAdapter {
    client: UpstreamClient,
    endpoints: TonEndpoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Explorer {
    ToncenterV2,
    ToncenterV3,
    TonApi,
}

const MEMO_PATHS: &[&[&str]] = &[
    &["message"],
    &["msg_data", "text"],
    &["message_content", "decoded", "comment"],
    &["message_content", "text"],
    &["decoded_body", "text"],
    &["decoded", "comment"],
    &["decoded", "text"],
    &["body"],
];

fn non_empty_str<'v>(v: &'v Value, path: &[&str]) -> Option<&'v str> {
    let mut cur = v;
    for p in path {
        cur = cur.get(*p)?;
    }
    cur.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// First non-empty comment field of an inbound message.
fn extract_memo(in_msg: &Value) -> Option<String> {
    MEMO_PATHS
        .iter()
        .find_map(|path| non_empty_str(in_msg, path))
        .map(str::to_string)
}

/// External messages (wallet deploys, bounces from nowhere) carry no
/// source and are not payments.
fn has_source(in_msg: &Value) -> bool {
    match in_msg.get("source") {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Object(o)) => o.get("address").and_then(Value::as_str).is_some_and(|s| !s.is_empty()),
        _ => false,
    }
}

fn parse_tx(tx: &Value, address: &str) -> Option<CandidateTransfer> {
    let in_msg = tx.get("in_msg").filter(|m| m.is_object())?;
    if !has_source(in_msg) {
        return None;
    }
    let tx_id = non_empty_str(tx, &["transaction_id", "hash"])
        .or_else(|| non_empty_str(tx, &["hash"]))?
        .to_string();
    let secs = tx
        .get("utime")
        .or_else(|| tx.get("now"))
        .and_then(Value::as_i64)?;
    Some(CandidateTransfer {
        tx_id,
        to_address: address.to_string(),
        amount_asset: in_msg
            .get("value")
            .and_then(|v| json_base_units(v, AssetClass::Ton.base_unit_decimals())),
        timestamp: ts_secs(secs)?,
        raw_memo: extract_memo(in_msg),
    })
}

impl TonAdapter {
    pub fn new(client: UpstreamClient, endpoints: TonEndpoints) -> Self {
        Self { client, endpoints }
    }

    async fn query(&self, explorer: Explorer, address: &str) -> Result<Vec<Value>, UpstreamError> {
        let key = self.endpoints.api_key.clone();
        match explorer {
            Explorer::ToncenterV2 => {
                let url = format!("{}/getTransactions", self.endpoints.toncenter_v2.trim_end_matches('/'));
                let headers: Vec<(&str, String)> = key.map(|k| ("X-API-Key", k)).into_iter().collect();
                let body: Value = self
                    .client
                    .get_json(
                        &url,
                        &[
                            ("address", address.to_string()),
                            ("limit", PAGE_SIZE.to_string()),
                            ("archival", "true".to_string()),
                        ],
                        &headers,
                    )
                    .await?;
                if body.get("ok").and_then(Value::as_bool) != Some(true) {
                    return Err(UpstreamError::malformed(host_key(&url), "ok != true"));
                }
                array_at(&url, &body, "result")
            }
            Explorer::ToncenterV3 => {
                let url = format!("{}/transactions", self.endpoints.toncenter_v3.trim_end_matches('/'));
                let headers: Vec<(&str, String)> = key.map(|k| ("X-API-Key", k)).into_iter().collect();
                let body: Value = self
                    .client
                    .get_json(
                        &url,
                        &[
                            ("account", address.to_string()),
                            ("limit", PAGE_SIZE.to_string()),
                            ("sort", "desc".to_string()),
                        ],
                        &headers,
                    )
                    .await?;
                array_at(&url, &body, "transactions")
            }
            Explorer::TonApi => {
                let url = format!(
                    "{}/blockchain/accounts/{}/transactions",
                    self.endpoints.tonapi.trim_end_matches('/'),
                    address
                );
                let headers: Vec<(&str, String)> = key
                    .map(|k| ("Authorization", format!("Bearer {k}")))
                    .into_iter()
                    .collect();
                let body: Value = self
                    .client
                    .get_json(&url, &[("limit", PAGE_SIZE.to_string())], &headers)
                    .await?;
                array_at(&url, &body, "transactions")
            }
        }
    }

    async fn fetch(&self, address: &str, since: DateTime<Utc>) -> Vec<CandidateTransfer> {
        let mut first_answer: Option<Vec<CandidateTransfer>> = None;
        for explorer in [Explorer::ToncenterV2, Explorer::ToncenterV3, Explorer::TonApi] {
            match self.query(explorer, address).await {
                Ok(rows) => {
                    tracing::debug!(?explorer, rows = rows.len(), "ton explorer answered");
                    let out = rows.iter().filter_map(|tx| parse_tx(tx, address)).collect();
                    let out = finalize(out, since);
                    if out.iter().any(|c| c.raw_memo.is_some()) {
                        return out;
                    }
                    if first_answer.as_ref().map_or(true, Vec::is_empty) {
                        first_answer = Some(out);
                    }
                }
                Err(e) => log_degraded(Chain::Ton, &e),
            }
        }
        first_answer.unwrap_or_default()
    }
}

fn array_at(url: &str, body: &Value, field: &str) -> Result<Vec<Value>, UpstreamError> {
    body.get(field)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| UpstreamError::malformed(host_key(url), format!("missing {field} array")))
}

impl ChainAdapter for TonAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Ton
    }

    fn supports_memo(&self) -> bool {
        true
    }

    fn list_inbound_transfers<'a>(
        &'a self,
        _asset: AssetClass,
        address: &'a str,
        since: DateTime<Utc>,
    ) -> TransferStream<'a> {
        from_fetch(self.fetch(address, since))
    }
}
