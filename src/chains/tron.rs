//! Tron via TronScan `api/transaction`.
//!
//! Native TRX and TRC20 transfers come back in the same list and are told
//! apart by payload shape: TRC20 rows carry `trigger_info`/`tokenInfo`,
//! native rows are `contractType == 1` with a plain `amount` in sun.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    finalize, from_fetch, log_degraded, ts_millis, CandidateTransfer, ChainAdapter, TransferStream,
};
use crate::asset::{AssetClass, Chain, ChainFamily};
use crate::errors::UpstreamError;
use crate::upstream::{host_key, UpstreamClient};
use crate::util::decimal::json_base_units;

const TRON_PAGE: usize = 50;

pub struct TronAdapter {
    client: UpstreamClient,
    base_url: String,
    usdt_contract: Option<String>,
}

#[derive(Debug, PartialEq)]
enum TronTransfer {
    Native {
        to: String,
        amount: Value,
    },
    Trc20 {
        to: String,
        value: Value,
        contract: String,
        decimals: u32,
    },
}

fn str_at<'v>(v: &'v Value, path: &[&str]) -> Option<&'v str> {
    let mut cur = v;
    for p in path {
        cur = cur.get(*p)?;
    }
    cur.as_str().filter(|s| !s.is_empty())
}

fn classify(row: &Value) -> Option<TronTransfer> {
    if let Some(trigger) = row.get("trigger_info") {
        let method = trigger.get("method").and_then(Value::as_str).unwrap_or_default();
        if !method.starts_with("transfer(") {
            return None;
        }
        let to = str_at(trigger, &["parameter", "_to"])?.to_string();
        let value = trigger.get("parameter")?.get("_value")?.clone();
        let contract = str_at(trigger, &["contract_address"])
            .or_else(|| str_at(row, &["toAddress"]))?
            .to_string();
        let decimals = row
            .get("tokenInfo")
            .and_then(|t| t.get("tokenDecimal"))
            .and_then(|d| d.as_u64().or_else(|| d.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(6) as u32;
        return Some(TronTransfer::Trc20 {
            to,
            value,
            contract,
            decimals,
        });
    }

    if row.get("contractType").and_then(Value::as_i64) == Some(1) {
        let to = str_at(row, &["contractData", "to_address"])
            .or_else(|| str_at(row, &["toAddress"]))?
            .to_string();
        let amount = row
            .get("contractData")
            .and_then(|c| c.get("amount"))
            .or_else(|| row.get("amount"))?
            .clone();
        return Some(TronTransfer::Native { to, amount });
    }
    None
}

impl TronAdapter {
    pub fn new(
        client: UpstreamClient,
        base_url: impl Into<String>,
        usdt_contract: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            usdt_contract,
        }
    }

    fn candidate(&self, asset: AssetClass, address: &str, row: &Value) -> Option<CandidateTransfer> {
        if let Some(ret) = row.get("contractRet").and_then(Value::as_str) {
            if ret != "SUCCESS" {
                return None;
            }
        }
        let tx_id = str_at(row, &["hash"])?.to_string();
        let timestamp = ts_millis(row.get("timestamp")?.as_i64()?)?;

        let (to, amount) = match (classify(row)?, asset) {
            (TronTransfer::Native { to, amount }, AssetClass::Trx) => {
                (to, json_base_units(&amount, AssetClass::Trx.base_unit_decimals()))
            }
            (
                TronTransfer::Trc20 {
                    to,
                    value,
                    contract,
                    decimals,
                },
                AssetClass::UsdtTrc20,
            ) => {
                let want = self.usdt_contract.as_deref()?;
                if contract != want {
                    return None;
                }
                (to, json_base_units(&value, decimals))
            }
            _ => return None,
        };
        if to != address {
            return None;
        }
        Some(CandidateTransfer {
            tx_id,
            to_address: to,
            amount_asset: amount,
            timestamp,
            raw_memo: None,
        })
    }

    async fn fetch(
        &self,
        asset: AssetClass,
        address: &str,
        since: DateTime<Utc>,
    ) -> Vec<CandidateTransfer> {
        let url = format!("{}/api/transaction", self.base_url.trim_end_matches('/'));
        let query = [
            ("sort", "-timestamp".to_string()),
            ("count", "true".to_string()),
            ("limit", TRON_PAGE.to_string()),
            ("start", "0".to_string()),
            ("address", address.to_string()),
        ];
        let body: Value = match self.client.get_json(&url, &query, &[]).await {
            Ok(b) => b,
            Err(e) => {
                log_degraded(Chain::Tron, &e);
                return Vec::new();
            }
        };
        let Some(rows) = body.get("data").and_then(Value::as_array) else {
            log_degraded(
                Chain::Tron,
                &UpstreamError::malformed(host_key(&url), "missing data array"),
            );
            return Vec::new();
        };
        let out = rows
            .iter()
            .filter_map(|r| self.candidate(asset, address, r))
            .collect();
        finalize(out, since)
    }
}

impl ChainAdapter for TronAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Tron
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
