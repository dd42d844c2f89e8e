pub mod decimal;
pub mod log_throttle;

pub use log_throttle::warn_throttled;
