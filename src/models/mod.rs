pub mod payment;

pub use payment::{CreditRecord, PaymentState, PendingPayment};
