//! Outbound payment events. The chat front-end implements
//! [`PaymentNotifier`] to message users; the binary ships [`LogNotifier`].

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::models::{CreditRecord, PendingPayment};

#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn credited(&self, payment: &PendingPayment, record: &CreditRecord);

    async fn expired(&self, payment: &PendingPayment);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn credited(&self, payment: &PendingPayment, record: &CreditRecord) {
        tracing::info!(
            payment_id = %payment.id,
            user_id = %payment.user_id,
            asset = %payment.asset_class,
            usd = %record.usd_amount,
            tx_id = %record.tx_id,
            "deposit confirmed, balance credited"
        );
    }

    async fn expired(&self, payment: &PendingPayment) {
        tracing::warn!(
            payment_id = %payment.id,
            user_id = %payment.user_id,
            asset = %payment.asset_class,
            usd = %payment.usd_amount,
            "deposit expired without a matching transfer, needs manual follow-up"
        );
    }
}

/// Records events in memory for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(event, payment_id)` pairs in arrival order.
    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl PaymentNotifier for RecordingNotifier {
    async fn credited(&self, payment: &PendingPayment, _record: &CreditRecord) {
        self.events.lock().push(("credited".into(), payment.id.clone()));
    }

    async fn expired(&self, payment: &PendingPayment) {
        self.events.lock().push(("expired".into(), payment.id.clone()));
    }
}
