//! Durable collection of deposit intents (`payments` tree, id -> JSON).
//!
//! Every state change is a single-tree sled transaction that re-reads the
//! record, so transitions are compare-and-swap against the stored state.

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Tree};

use crate::errors::StoreError;
use crate::models::{PaymentState, PendingPayment};

pub const PAYMENTS_TREE: &str = "payments";

#[derive(Clone)]
pub struct PendingPaymentStore {
    db: Db,
    payments: Tree,
}

impl PendingPaymentStore {
    pub fn open(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            db: db.clone(),
            payments: db.open_tree(PAYMENTS_TREE)?,
        })
    }

    pub fn insert(&self, payment: &PendingPayment) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(payment)?;
        self.payments.insert(payment.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingPayment>, StoreError> {
        match self.payments.get(id.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, id: &str) -> Result<PendingPayment, StoreError> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn scan(&self) -> impl Iterator<Item = Result<PendingPayment, StoreError>> + '_ {
        self.payments.iter().values().map(|v| {
            let v = v?;
            Ok(serde_json::from_slice::<PendingPayment>(&v)?)
        })
    }

    /// Pending/Verifying payments created within `horizon` of `now`, oldest first.
    pub fn list_open(
        &self,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<PendingPayment>, StoreError> {
        let mut out = Vec::new();
        for p in self.scan() {
            let p = p?;
            if p.state.is_open() && !p.is_past_horizon(now, horizon) {
                out.push(p);
            }
        }
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }

    /// Open payments whose horizon has elapsed.
    pub fn list_expirable(
        &self,
        now: DateTime<Utc>,
        horizon: chrono::Duration,
    ) -> Result<Vec<PendingPayment>, StoreError> {
        let mut out = Vec::new();
        for p in self.scan() {
            let p = p?;
            if p.state.is_open() && p.is_past_horizon(now, horizon) {
                out.push(p);
            }
        }
        Ok(out)
    }

    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<PendingPayment>, StoreError> {
        let mut out = Vec::new();
        for p in self.scan() {
            let p = p?;
            if p.user_id == user_id {
                out.push(p);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// Pending/Verifying -> Expired. Returns false when the payment already
    /// left the open states (e.g. credited concurrently).
    pub fn mark_expired(&self, id: &str) -> Result<bool, StoreError> {
        self.update(id, |p| {
            if !p.state.is_open() {
                return Ok(None);
            }
            let mut next = p.clone();
            next.state = PaymentState::Expired;
            Ok(Some(next))
        })
        .map(|r| r.is_some())
    }

    /// Admin rejection. Never allowed once Completed.
    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<PendingPayment, StoreError> {
        let updated = self.update(id, |p| match p.state {
            PaymentState::Completed => Err(StoreError::InvalidTransition {
                id: p.id.clone(),
                from: p.state,
                action: "reject",
            }),
            PaymentState::Failed => Ok(None),
            _ => {
                let mut next = p.clone();
                next.state = PaymentState::Failed;
                next.failure_reason = Some(reason.to_string());
                Ok(Some(next))
            }
        })?;
        match updated {
            Some(p) => Ok(p),
            None => self.require(id),
        }
    }

    /// Payer-reported tx hash: Pending/Verifying -> Verifying.
    pub fn submit_tx_hint(&self, id: &str, tx_id: &str) -> Result<PendingPayment, StoreError> {
        let updated = self.update(id, |p| {
            if !p.state.is_open() {
                return Err(StoreError::InvalidTransition {
                    id: p.id.clone(),
                    from: p.state,
                    action: "submit a transaction for",
                });
            }
            let mut next = p.clone();
            next.state = PaymentState::Verifying;
            next.claimed_tx_id = Some(tx_id.trim().to_string());
            Ok(Some(next))
        })?;
        match updated {
            Some(p) => Ok(p),
            None => self.require(id),
        }
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.db.flush()?)
    }

    /// Read-modify-write of one payment inside a transaction. `f` returns
    /// `Ok(None)` to leave the record untouched.
    fn update<F>(&self, id: &str, f: F) -> Result<Option<PendingPayment>, StoreError>
    where
        F: Fn(&PendingPayment) -> Result<Option<PendingPayment>, StoreError>,
    {
        self.payments
            .transaction(|tx: &TransactionalTree| {
                let current = match tx.get(id.as_bytes())? {
                    Some(v) => serde_json::from_slice::<PendingPayment>(&v)
                        .map_err(|e| ConflictableTransactionError::Abort(StoreError::Serde(e)))?,
                    None => {
                        return Err(ConflictableTransactionError::Abort(StoreError::NotFound(
                            id.to_string(),
                        )))
                    }
                };
                let next = f(&current).map_err(ConflictableTransactionError::Abort)?;
                if let Some(ref next) = next {
                    let bytes = serde_json::to_vec(next)
                        .map_err(|e| ConflictableTransactionError::Abort(StoreError::Serde(e)))?;
                    tx.insert(id.as_bytes(), bytes)?;
                }
                Ok(next)
            })
            .map_err(flatten)
    }
}

pub(crate) fn flatten(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetClass;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn store() -> (TempDir, PendingPaymentStore) {
        let tmp = TempDir::new().expect("tmpdir");
        let db = sled::open(tmp.path()).expect("db");
        (tmp, PendingPaymentStore::open(&db).expect("store"))
    }

    fn payment(id: &str, user: &str, created_at: DateTime<Utc>) -> PendingPayment {
        PendingPayment::new(
            id.into(),
            user,
            Decimal::new(2500, 2),
            AssetClass::Btc,
            "bc1qexample",
            None,
            created_at,
        )
    }

    #[test]
    fn open_listing_respects_horizon_and_state() {
        let (_tmp, s) = store();
        let now = Utc::now();
        let h = Duration::hours(48);
        s.insert(&payment("fresh", "u", now - Duration::hours(1))).unwrap();
        s.insert(&payment("old", "u", now - Duration::hours(49))).unwrap();
        let mut done = payment("done", "u", now);
        done.state = PaymentState::Completed;
        s.insert(&done).unwrap();

        let open: Vec<_> = s.list_open(now, h).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(open, vec!["fresh".to_string()]);
        let stale: Vec<_> = s.list_expirable(now, h).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[test]
    fn expire_is_compare_and_swap() {
        let (_tmp, s) = store();
        s.insert(&payment("p", "u", Utc::now())).unwrap();
        assert!(s.mark_expired("p").unwrap());
        assert!(!s.mark_expired("p").unwrap());
        assert_eq!(s.require("p").unwrap().state, PaymentState::Expired);
        assert!(matches!(s.mark_expired("missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn tx_hint_moves_to_verifying_only_while_open() {
        let (_tmp, s) = store();
        s.insert(&payment("p", "u", Utc::now())).unwrap();
        let p = s.submit_tx_hint("p", " 0xabc ").unwrap();
        assert_eq!(p.state, PaymentState::Verifying);
        assert_eq!(p.claimed_tx_id.as_deref(), Some("0xabc"));

        s.mark_expired("p").unwrap();
        assert!(matches!(
            s.submit_tx_hint("p", "0xdef"),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn reject_never_touches_completed() {
        let (_tmp, s) = store();
        let mut p = payment("p", "u", Utc::now());
        p.state = PaymentState::Completed;
        p.confirmed_tx_id = Some("tx".into());
        s.insert(&p).unwrap();
        assert!(s.mark_failed("p", "fraud").is_err());

        s.insert(&payment("q", "u", Utc::now())).unwrap();
        let q = s.mark_failed("q", "wrong network").unwrap();
        assert_eq!(q.state, PaymentState::Failed);
        assert_eq!(q.failure_reason.as_deref(), Some("wrong network"));
    }

    #[test]
    fn list_by_user_is_newest_first() {
        let (_tmp, s) = store();
        let now = Utc::now();
        s.insert(&payment("a", "alice", now - Duration::minutes(5))).unwrap();
        s.insert(&payment("b", "alice", now)).unwrap();
        s.insert(&payment("c", "bob", now)).unwrap();
        let ids: Vec<_> = s.list_by_user("alice").unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }
}
