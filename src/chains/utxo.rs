//! Bitcoin via blockchain.info `rawaddr`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{
    finalize, from_fetch, log_degraded, ts_secs, CandidateTransfer, ChainAdapter, TransferStream,
    PAGE_SIZE,
};
use crate::asset::{AssetClass, Chain, ChainFamily};
use crate::upstream::UpstreamClient;
use crate::util::decimal::from_base_units;

pub struct UtxoAdapter {
    client: UpstreamClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RawAddr {
    #[serde(default)]
    txs: Vec<RawTx>,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    hash: String,
    time: i64,
    #[serde(default)]
    out: Vec<RawOut>,
}

#[derive(Debug, Deserialize)]
struct RawOut {
    #[serde(default)]
    addr: Option<String>,
    /// satoshis
    value: i64,
}

impl UtxoAdapter {
    pub fn new(client: UpstreamClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, address: &str, since: DateTime<Utc>) -> Vec<CandidateTransfer> {
        let url = format!("{}/rawaddr/{}", self.base_url.trim_end_matches('/'), address);
        let body: RawAddr = match self
            .client
            .get_json(&url, &[("limit", PAGE_SIZE.to_string())], &[])
            .await
        {
            Ok(b) => b,
            Err(e) => {
                log_degraded(Chain::Bitcoin, &e);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for tx in body.txs {
            let Some(timestamp) = ts_secs(tx.time) else {
                continue;
            };
            for o in tx.out.iter().filter(|o| o.addr.as_deref() == Some(address)) {
                out.push(CandidateTransfer {
                    tx_id: tx.hash.clone(),
                    to_address: address.to_string(),
                    amount_asset: from_base_units(
                        o.value.into(),
                        AssetClass::Btc.base_unit_decimals(),
                    ),
                    timestamp,
                    raw_memo: None,
                });
            }
        }
        finalize(out, since)
    }
}

impl ChainAdapter for UtxoAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Utxo
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
