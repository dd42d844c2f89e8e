// Credit-once ledger: the only writer of user balances.
//
// A credit touches four trees (payments, credits, credited_txs, balances)
// inside one sled transaction, so a crash can never leave a balance applied
// without its CreditRecord, or a Completed payment without a credit.
//
// `credited_txs` maps an on-chain tx id to the payment it settled. Many
// payments share one custodial address, so without it a single transfer
// could satisfy two intents of similar size.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Transactional, Tree};
use std::str::FromStr;

use crate::errors::StoreError;
use crate::models::{CreditRecord, PaymentState, PendingPayment};
use crate::store::{flatten, PAYMENTS_TREE};

pub const CREDITS_TREE: &str = "credits";
pub const BALANCES_TREE: &str = "balances";
pub const CREDITED_TXS_TREE: &str = "credited_txs";

#[derive(Clone)]
pub struct CreditLedger {
    payments: Tree,
    credits: Tree,
    credited_txs: Tree,
    balances: Tree,
}

/// EVM hashes are hex and may come back in either case.
fn tx_key(tx_id: &str) -> String {
    let t = tx_id.trim();
    if t.starts_with("0x") || t.starts_with("0X") {
        t.to_ascii_lowercase()
    } else {
        t.to_string()
    }
}

fn abort<T>(e: StoreError) -> Result<T, ConflictableTransactionError<StoreError>> {
    Err(ConflictableTransactionError::Abort(e))
}

fn parse_balance(raw: &[u8]) -> Result<Decimal, StoreError> {
    let s = std::str::from_utf8(raw).map_err(|e| StoreError::Corrupt(format!("balance: {e}")))?;
    Decimal::from_str(s).map_err(|e| StoreError::Corrupt(format!("balance {s:?}: {e}")))
}

impl CreditLedger {
    pub fn open(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            payments: db.open_tree(PAYMENTS_TREE)?,
            credits: db.open_tree(CREDITS_TREE)?,
            credited_txs: db.open_tree(CREDITED_TXS_TREE)?,
            balances: db.open_tree(BALANCES_TREE)?,
        })
    }

    /// Credit `usd_amount` to `user_id` for `payment_id` at most once, and
    /// move the payment to Completed with `tx_id`.
    ///
    /// Returns `Ok(false)` when a CreditRecord already exists (a concurrent or
    /// earlier caller won); the balance is left untouched in that case.
    /// Allowed from Pending, Verifying and Expired. A Failed payment is an
    /// `InvalidTransition`; a `tx_id` that already settled another payment
    /// is `TxAlreadyCredited`.
    pub fn credit_once(
        &self,
        payment_id: &str,
        user_id: &str,
        usd_amount: Decimal,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let tx_key = tx_key(tx_id);
        let credited = (&self.payments, &self.credits, &self.credited_txs, &self.balances)
            .transaction(|(payments, credits, credited_txs, balances)| {
                if credits.get(payment_id.as_bytes())?.is_some() {
                    return Ok(false);
                }
                if let Some(owner) = credited_txs.get(tx_key.as_bytes())? {
                    return abort(StoreError::TxAlreadyCredited {
                        tx_id: tx_id.to_string(),
                        payment_id: String::from_utf8_lossy(&owner).into_owned(),
                    });
                }

                let mut payment: PendingPayment = match payments.get(payment_id.as_bytes())? {
                    Some(v) => match serde_json::from_slice(&v) {
                        Ok(p) => p,
                        Err(e) => return abort(StoreError::Serde(e)),
                    },
                    None => return abort(StoreError::NotFound(payment_id.to_string())),
                };

                if payment.user_id != user_id || payment.usd_amount != usd_amount {
                    return abort(StoreError::Corrupt(format!(
                        "credit for {payment_id} does not match the stored payment"
                    )));
                }
                match payment.state {
                    PaymentState::Pending | PaymentState::Verifying | PaymentState::Expired => {}
                    from => {
                        return abort(StoreError::InvalidTransition {
                            id: payment_id.to_string(),
                            from,
                            action: "credit",
                        })
                    }
                }

                let current = match balances.get(user_id.as_bytes())? {
                    Some(v) => match parse_balance(&v) {
                        Ok(b) => b,
                        Err(e) => return abort(e),
                    },
                    None => Decimal::ZERO,
                };
                let Some(next) = current.checked_add(usd_amount) else {
                    return abort(StoreError::Corrupt(format!("balance overflow for {user_id}")));
                };

                let record = CreditRecord {
                    payment_id: payment_id.to_string(),
                    user_id: user_id.to_string(),
                    usd_amount,
                    tx_id: tx_id.to_string(),
                    credited_at: now,
                };
                payment.state = PaymentState::Completed;
                payment.confirmed_tx_id = Some(tx_id.to_string());
                payment.confirmed_at = Some(now);

                let record_bytes = match serde_json::to_vec(&record) {
                    Ok(b) => b,
                    Err(e) => return abort(StoreError::Serde(e)),
                };
                let payment_bytes = match serde_json::to_vec(&payment) {
                    Ok(b) => b,
                    Err(e) => return abort(StoreError::Serde(e)),
                };

                credits.insert(payment_id.as_bytes(), record_bytes)?;
                credited_txs.insert(tx_key.as_bytes(), payment_id.as_bytes())?;
                balances.insert(user_id.as_bytes(), next.to_string().as_bytes())?;
                payments.insert(payment_id.as_bytes(), payment_bytes)?;
                Ok(true)
            })
            .map_err(flatten)?;

        if credited {
            tracing::info!(payment_id, user_id, %usd_amount, tx_id, "credited");
        } else {
            tracing::debug!(payment_id, "already credited, no-op");
        }
        Ok(credited)
    }

    pub fn credit_record(&self, payment_id: &str) -> Result<Option<CreditRecord>, StoreError> {
        match self.credits.get(payment_id.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    /// Payment already settled by `tx_id`, if any.
    pub fn tx_owner(&self, tx_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .credited_txs
            .get(tx_key(tx_id).as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    pub fn balance_of(&self, user_id: &str) -> Result<Decimal, StoreError> {
        match self.balances.get(user_id.as_bytes())? {
            Some(v) => parse_balance(&v),
            None => Ok(Decimal::ZERO),
        }
    }

    pub fn credit_count(&self) -> usize {
        self.credits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetClass;
    use crate::store::PendingPaymentStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PendingPaymentStore, CreditLedger) {
        let tmp = TempDir::new().expect("tmpdir");
        let db = sled::open(tmp.path()).expect("db");
        let store = PendingPaymentStore::open(&db).unwrap();
        let ledger = CreditLedger::open(&db).unwrap();
        (tmp, store, ledger)
    }

    fn pending(id: &str) -> PendingPayment {
        PendingPayment::new(
            id.into(),
            "alice",
            Decimal::new(1000, 2),
            AssetClass::UsdtBep20,
            "0x4a998ce0877924feb7af749de60b644e1c39dad4",
            None,
            Utc::now(),
        )
    }

    #[test]
    fn credit_completes_payment_and_applies_balance_once() {
        let (_tmp, store, ledger) = setup();
        store.insert(&pending("p1")).unwrap();
        let amt = Decimal::new(1000, 2);

        assert!(ledger.credit_once("p1", "alice", amt, "0xtx", Utc::now()).unwrap());
        assert!(!ledger.credit_once("p1", "alice", amt, "0xother", Utc::now()).unwrap());

        assert_eq!(ledger.balance_of("alice").unwrap(), amt);
        let p = store.require("p1").unwrap();
        assert_eq!(p.state, PaymentState::Completed);
        assert_eq!(p.confirmed_tx_id.as_deref(), Some("0xtx"));
        assert!(p.confirmed_at.is_some());
        assert_eq!(ledger.credit_record("p1").unwrap().unwrap().tx_id, "0xtx");
    }

    #[test]
    fn balances_accumulate_across_payments() {
        let (_tmp, store, ledger) = setup();
        store.insert(&pending("a")).unwrap();
        store.insert(&pending("b")).unwrap();
        let amt = Decimal::new(1000, 2);
        ledger.credit_once("a", "alice", amt, "t1", Utc::now()).unwrap();
        ledger.credit_once("b", "alice", amt, "t2", Utc::now()).unwrap();
        assert_eq!(ledger.balance_of("alice").unwrap(), Decimal::new(2000, 2));
        assert_eq!(ledger.balance_of("nobody").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn failed_payment_cannot_be_credited() {
        let (_tmp, store, ledger) = setup();
        store.insert(&pending("p")).unwrap();
        store.mark_failed("p", "refunded").unwrap();
        let err = ledger
            .credit_once("p", "alice", Decimal::new(1000, 2), "tx", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(ledger.balance_of("alice").unwrap(), Decimal::ZERO);
        assert_eq!(ledger.credit_count(), 0);
    }

    #[test]
    fn expired_payment_can_still_be_credited() {
        let (_tmp, store, ledger) = setup();
        store.insert(&pending("p")).unwrap();
        store.mark_expired("p").unwrap();
        assert!(ledger
            .credit_once("p", "alice", Decimal::new(1000, 2), "late", Utc::now())
            .unwrap());
        assert_eq!(store.require("p").unwrap().state, PaymentState::Completed);
    }

    #[test]
    fn one_transfer_cannot_settle_two_payments() {
        let (_tmp, store, ledger) = setup();
        store.insert(&pending("a")).unwrap();
        store.insert(&pending("b")).unwrap();
        let amt = Decimal::new(1000, 2);
        assert!(ledger.credit_once("a", "alice", amt, "0xABC", Utc::now()).unwrap());
        let err = ledger.credit_once("b", "alice", amt, "0xabc", Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::TxAlreadyCredited { ref payment_id, .. } if payment_id == "a"));
        assert_eq!(ledger.tx_owner("0xAbC").unwrap().as_deref(), Some("a"));
        assert_eq!(ledger.balance_of("alice").unwrap(), amt);
        assert_eq!(store.require("b").unwrap().state, PaymentState::Pending);
    }

    #[test]
    fn mismatched_credit_is_refused() {
        let (_tmp, store, ledger) = setup();
        store.insert(&pending("p")).unwrap();
        assert!(ledger
            .credit_once("p", "mallory", Decimal::new(1000, 2), "tx", Utc::now())
            .is_err());
        assert!(ledger.credit_once("missing", "alice", Decimal::ONE, "tx", Utc::now()).is_err());
    }
}
