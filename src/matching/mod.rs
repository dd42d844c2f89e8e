//! Match decision: does a candidate transfer settle a pending payment?
//!
//! The engine is pure. It never fetches prices or touches storage; the
//! worker hands it an [`Expectation`] built from one oracle quote and a
//! stream of candidates, and the first acceptable candidate (newest first)
//! wins.

pub mod memo;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::convert::Infallible;

use crate::asset::{AssetClass, ValueClass};
use crate::chains::{AmountPolicy, CandidateTransfer, ChainAdapter, TransferStream};
use crate::models::PendingPayment;

pub use memo::{decode_memo, memo_contains};

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub stable_tolerance: Decimal,
    pub volatile_tolerance: Decimal,
    /// Let Solana transfers with no derivable amount match on presence.
    pub solana_presence_only: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            stable_tolerance: Decimal::new(2, 2),
            volatile_tolerance: Decimal::new(5, 2),
            solana_presence_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched {
        tx_id: String,
        observed_amount: Option<Decimal>,
    },
    NotFound,
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Everything needed to judge candidates for one verification attempt.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub expected_amount: Decimal,
    pub tolerance: Decimal,
    pub reference_memo: Option<String>,
    /// Memo decides alone; amounts are not consulted.
    pub memo_mode: bool,
    pub policy: AmountPolicy,
    pub since: DateTime<Utc>,
}

impl Expectation {
    /// Smallest observed amount that still matches.
    pub fn min_amount(&self) -> Decimal {
        self.expected_amount * (Decimal::ONE - self.tolerance)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchEngine {
    cfg: MatchConfig,
}

impl MatchEngine {
    pub fn new(cfg: MatchConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    pub fn tolerance(&self, asset: AssetClass) -> Decimal {
        match asset.value_class() {
            ValueClass::Stable => self.cfg.stable_tolerance,
            ValueClass::Volatile => self.cfg.volatile_tolerance,
        }
    }

    /// `usd / rate` in asset units, rounded to the asset's display decimals.
    pub fn expected_amount(&self, usd: Decimal, rate: Decimal, asset: AssetClass) -> Option<Decimal> {
        if rate <= Decimal::ZERO {
            return None;
        }
        Some(
            usd.checked_div(rate)?
                .round_dp_with_strategy(asset.display_decimals(), RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn expectation(
        &self,
        payment: &PendingPayment,
        usd_rate: Decimal,
        adapter: &dyn ChainAdapter,
    ) -> Option<Expectation> {
        let reference_memo = payment
            .reference_memo
            .clone()
            .filter(|m| !m.trim().is_empty());
        Some(Expectation {
            expected_amount: self.expected_amount(payment.usd_amount, usd_rate, payment.asset_class)?,
            tolerance: self.tolerance(payment.asset_class),
            memo_mode: reference_memo.is_some() && adapter.supports_memo(),
            reference_memo,
            policy: adapter.amount_policy(),
            since: payment.created_at,
        })
    }

    pub fn evaluate(&self, exp: &Expectation, c: &CandidateTransfer) -> bool {
        if c.timestamp < exp.since {
            return false;
        }
        if exp.memo_mode {
            return match (&c.raw_memo, &exp.reference_memo) {
                (Some(raw), Some(reference)) => memo_contains(raw, reference),
                _ => false,
            };
        }
        match (c.amount_asset, exp.policy) {
            (Some(observed), _) => observed >= exp.min_amount(),
            (None, AmountPolicy::PresenceOnly) => true,
            (None, AmountPolicy::Exact) => false,
        }
    }

    /// First acceptable candidate of an in-memory list.
    pub fn select<'c>(
        &self,
        exp: &Expectation,
        candidates: impl IntoIterator<Item = &'c CandidateTransfer>,
    ) -> MatchOutcome {
        candidates
            .into_iter()
            .find(|c| self.evaluate(exp, c))
            .map_or(MatchOutcome::NotFound, matched)
    }

    /// Pull candidates until one is acceptable; the rest of the stream is
    /// never fetched.
    pub async fn find_match(&self, exp: &Expectation, stream: TransferStream<'_>) -> MatchOutcome {
        match self
            .find_match_where(exp, stream, |_| Ok::<_, Infallible>(true))
            .await
        {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Like [`find_match`](Self::find_match), but a candidate must also pass
    /// `accept` (e.g. its tx has not settled another payment).
    pub async fn find_match_where<E>(
        &self,
        exp: &Expectation,
        mut stream: TransferStream<'_>,
        mut accept: impl FnMut(&CandidateTransfer) -> Result<bool, E>,
    ) -> Result<MatchOutcome, E> {
        while let Some(c) = stream.next().await {
            if self.evaluate(exp, &c) && accept(&c)? {
                return Ok(matched(&c));
            }
        }
        Ok(MatchOutcome::NotFound)
    }
}

fn matched(c: &CandidateTransfer) -> MatchOutcome {
    MatchOutcome::Matched {
        tx_id: c.tx_id.clone(),
        observed_amount: c.amount_asset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn exp(expected: i64, tol_pct: i64) -> Expectation {
        Expectation {
            expected_amount: Decimal::new(expected, 2),
            tolerance: Decimal::new(tol_pct, 2),
            reference_memo: None,
            memo_mode: false,
            policy: AmountPolicy::Exact,
            since: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn cand(tx: &str, amount: Option<Decimal>, memo: Option<&str>) -> CandidateTransfer {
        CandidateTransfer {
            tx_id: tx.into(),
            to_address: "W".into(),
            amount_asset: amount,
            timestamp: Utc::now(),
            raw_memo: memo.map(str::to_string),
        }
    }

    fn amt(cents: i64) -> Option<Decimal> {
        Some(Decimal::new(cents, 2))
    }

    #[test]
    fn stable_band_is_two_percent() {
        let e = MatchEngine::default();
        let x = exp(1000, 2);
        assert!(e.evaluate(&x, &cand("a", amt(980), None)));
        assert!(!e.evaluate(&x, &cand("b", amt(979), None)));
    }

    #[test]
    fn volatile_band_is_five_percent() {
        let e = MatchEngine::default();
        let x = exp(1000, 5);
        assert!(e.evaluate(&x, &cand("a", amt(950), None)));
        assert!(!e.evaluate(&x, &cand("b", amt(949), None)));
    }

    #[test]
    fn overpayment_always_matches() {
        let e = MatchEngine::default();
        for tol in [0, 2, 5] {
            assert!(e.evaluate(&exp(1000, tol), &cand("a", amt(1_000_000), None)));
            assert!(e.evaluate(&exp(1000, tol), &cand("a", amt(1000), None)));
        }
    }

    #[test]
    fn memo_beats_amount_on_memo_chains() {
        let e = MatchEngine::default();
        let mut x = exp(1000, 5);
        x.reference_memo = Some("dep_42".into());
        x.memo_mode = true;
        let list = [
            cand("exact-no-memo", amt(1000), None),
            cand("cheap-with-memo", amt(1), Some("dep_42")),
        ];
        assert_eq!(
            e.select(&x, &list),
            MatchOutcome::Matched {
                tx_id: "cheap-with-memo".into(),
                observed_amount: amt(1)
            }
        );
        assert_eq!(e.select(&x, &list[..1]), MatchOutcome::NotFound);
    }

    #[test]
    fn unknown_amount_depends_on_policy() {
        let e = MatchEngine::default();
        let mut x = exp(1000, 5);
        let c = cand("sig", None, None);
        assert!(!e.evaluate(&x, &c));
        x.policy = AmountPolicy::PresenceOnly;
        assert!(e.evaluate(&x, &c));
    }

    #[test]
    fn candidates_before_since_are_ignored() {
        let e = MatchEngine::default();
        let mut x = exp(1000, 2);
        x.since = Utc::now() + chrono::Duration::minutes(1);
        assert!(!e.evaluate(&x, &cand("early", amt(5000), None)));
    }

    #[test]
    fn first_match_by_recency_wins() {
        let e = MatchEngine::default();
        let list = [cand("newest", amt(1500), None), cand("older", amt(1000), None)];
        assert!(matches!(e.select(&exp(1000, 2), &list), MatchOutcome::Matched { ref tx_id, .. } if tx_id == "newest"));
    }

    #[test]
    fn expected_amount_rounds_to_display_decimals() {
        let e = MatchEngine::default();
        // 10 / 3 USDT
        assert_eq!(
            e.expected_amount(Decimal::TEN, Decimal::new(3, 0), AssetClass::UsdtTrc20),
            Some(Decimal::new(333, 2))
        );
        // 25 USD at 0.125 TRX rate = 200 TRX
        assert_eq!(
            e.expected_amount(Decimal::new(25, 0), Decimal::new(125, 3), AssetClass::Trx),
            Some(Decimal::new(200, 0))
        );
        // 10 / 64000 BTC at 8 dp, midpoint away from zero
        assert_eq!(
            e.expected_amount(Decimal::TEN, Decimal::new(64000, 0), AssetClass::Btc),
            Some(Decimal::new(15625, 8))
        );
        assert_eq!(e.expected_amount(Decimal::TEN, Decimal::ZERO, AssetClass::Btc), None);
    }

    #[tokio::test]
    async fn find_match_stops_pulling_after_first_hit() {
        let e = MatchEngine::default();
        let items = vec![cand("hit", amt(1000), None), cand("never-polled", amt(1000), None)];
        let pulled = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let p = pulled.clone();
        let s = stream::iter(items)
            .inspect(move |_| {
                p.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .boxed();
        let out = e.find_match(&exp(1000, 2), s).await;
        assert!(out.is_matched());
        assert_eq!(pulled.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_candidates_are_skipped() {
        let e = MatchEngine::default();
        let s = stream::iter(vec![cand("used", amt(1000), None), cand("fresh", amt(1000), None)]).boxed();
        let out = e
            .find_match_where(&exp(1000, 2), s, |c| Ok::<_, ()>(c.tx_id != "used"))
            .await
            .unwrap();
        assert!(matches!(out, MatchOutcome::Matched { ref tx_id, .. } if tx_id == "fresh"));
    }
}
