use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::warn;

/// Last time each warning key was emitted.
static LAST: Lazy<Mutex<HashMap<String, Instant>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Only warn once per `period` for the same `key`. Returns whether it logged.
pub fn warn_throttled(key: impl Into<String>, period: Duration, msg: impl AsRef<str>) -> bool {
    let key = key.into();
    let now = Instant::now();
    let mut map = LAST.lock();
    match map.get(&key) {
        Some(&prev) if now.duration_since(prev) < period => false,
        _ => {
            warn!(throttle_key = %key, "{}", msg.as_ref());
            map.insert(key, now);
            true
        }
    }
}
