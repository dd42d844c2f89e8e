use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use prometheus::{opts, Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};

/// Public handle shared by the worker, oracle, upstream client and API.
///
/// Each instance owns its own registry so tests can build a fresh one.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Worker
    pub cycles_total: IntCounter,
    pub payments_checked_total: IntCounter,
    pub matches_total: IntCounter,
    pub expired_total: IntCounter,
    pub skipped_total: IntCounter,

    // Ledger
    pub credits_total: IntCounter,
    pub duplicate_credits_total: IntCounter,

    // Upstreams
    pub upstream_failures: IntCounterVec,
    pub price_lookups: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry =
            Registry::new_custom(Some("reconciler".to_string()), None).expect("metrics registry");

        let cycles_total = counter("cycles_total", "Reconciliation cycles run");
        let payments_checked_total =
            counter("payments_checked_total", "Payments verified against a chain");
        let matches_total = counter("matches_total", "Verifications that found a matching transfer");
        let expired_total = counter("expired_total", "Payments moved to Expired");
        let skipped_total = counter("skipped_total", "Verifications skipped (no price, no adapter)");
        let credits_total = counter("credits_total", "Ledger credits applied");
        let duplicate_credits_total =
            counter("duplicate_credits_total", "CreditOnce calls that found an existing record");
        let upstream_failures = counter_vec(
            "upstream_failures_total",
            "Failed upstream requests by host",
            &["host"],
        );
        let price_lookups =
            counter_vec("price_lookups_total", "Price lookups by resolved source", &["source"]);

        let m = Self {
            registry,
            cycles_total,
            payments_checked_total,
            matches_total,
            expired_total,
            skipped_total,
            credits_total,
            duplicate_credits_total,
            upstream_failures,
            price_lookups,
        };

        for c in [
            &m.cycles_total,
            &m.payments_checked_total,
            &m.matches_total,
            &m.expired_total,
            &m.skipped_total,
            &m.credits_total,
            &m.duplicate_credits_total,
        ] {
            if let Err(e) = m.registry.register(Box::new(c.clone())) {
                tracing::warn!(error = %e, "metric registration failed");
            }
        }
        for v in [&m.upstream_failures, &m.price_lookups] {
            if let Err(e) = m.registry.register(Box::new(v.clone())) {
                tracing::warn!(error = %e, "metric registration failed");
            }
        }
        m
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(opts!(name, help)).expect("static counter definition")
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(opts!(name, help), labels).expect("static counter vec definition")
}

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
