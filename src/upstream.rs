//! Shared HTTP client for price sources and chain explorers.
//!
//! Every request carries the configured hard timeout. Requests are gated per
//! upstream host (not per payment): a semaphore bounds in-flight calls and a
//! minimum spacing separates consecutive calls to the same host.

use dashmap::DashMap;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::errors::UpstreamError;
use crate::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub timeout: Duration,
    pub per_host_concurrency: usize,
    pub per_host_spacing: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            per_host_concurrency: 2,
            per_host_spacing: Duration::from_millis(250),
        }
    }
}

struct HostGate {
    permits: Semaphore,
    last_request: Mutex<Option<Instant>>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    cfg: UpstreamConfig,
    hosts: Arc<DashMap<String, Arc<HostGate>>>,
    metrics: Option<Metrics>,
}

/// Host part of `url`, used as the rate-limit key. Includes the port so
/// local mock servers on different ports do not share a gate.
pub fn host_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => match (u.host_str(), u.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            _ => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}

impl UpstreamClient {
    pub fn new(cfg: UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .user_agent(concat!("payment-reconciler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::unavailable("client", e))?;
        Ok(Self {
            http,
            cfg,
            hosts: Arc::new(DashMap::new()),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.cfg
    }

    fn gate(&self, host: &str) -> Arc<HostGate> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostGate {
                    permits: Semaphore::new(self.cfg.per_host_concurrency.max(1)),
                    last_request: Mutex::new(None),
                })
            })
            .clone()
    }

    /// GET `url` with query parameters and optional headers, decoding JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let mut req = self.http.get(url).query(query);
        for (k, v) in headers {
            req = req.header(*k, v);
        }
        self.send(url, req).await
    }

    /// POST a JSON body (JSON-RPC style) and decode the JSON reply.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, UpstreamError> {
        let req = self.http.post(url).json(body);
        self.send(url, req).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        req: RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let host = host_key(url);
        let result = self.send_gated(&host, req).await;
        if let Err(ref e) = result {
            tracing::debug!(host = %host, error = %e, "upstream request failed");
            if let Some(m) = &self.metrics {
                m.upstream_failures.with_label_values(&[host.as_str()]).inc();
            }
        }
        result
    }

    async fn send_gated<T: DeserializeOwned>(
        &self,
        host: &str,
        req: RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let gate = self.gate(host);
        let _permit = gate
            .permits
            .acquire()
            .await
            .map_err(|e| UpstreamError::unavailable(host, e))?;

        {
            let mut last = gate.last_request.lock().await;
            if let Some(prev) = *last {
                let next_allowed = prev + self.cfg.per_host_spacing;
                if next_allowed > Instant::now() {
                    tokio::time::sleep_until(next_allowed).await;
                }
            }
            *last = Some(Instant::now());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::unavailable(host, format!("timed out after {:?}", self.cfg.timeout))
            } else {
                UpstreamError::unavailable(host, e.without_url())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::unavailable(host, format!("status {status}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| UpstreamError::unavailable(host, e.without_url()))?;
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::malformed(host, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(spacing_ms: u64) -> UpstreamClient {
        UpstreamClient::new(UpstreamConfig {
            timeout: Duration::from_millis(500),
            per_host_concurrency: 1,
            per_host_spacing: Duration::from_millis(spacing_ms),
        })
        .unwrap()
    }

    #[test]
    fn host_key_includes_port() {
        assert_eq!(host_key("https://api.etherscan.io/api?x=1"), "api.etherscan.io");
        assert_eq!(host_key("http://127.0.0.1:4000/rawaddr/x"), "127.0.0.1:4000");
    }

    #[tokio::test]
    async fn classifies_status_and_body_failures() {
        let app = Router::new()
            .route("/ok", get(|| async { Json(serde_json::json!({"a": 1})) }))
            .route("/bad", get(|| async { "not json" }))
            .route(
                "/err",
                get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "down") }),
            );
        let base = serve(app).await;
        let c = client(0).with_metrics(Metrics::new());

        let v: serde_json::Value = c.get_json(&format!("{base}/ok"), &[], &[]).await.unwrap();
        assert_eq!(v["a"], 1);

        let e = c
            .get_json::<serde_json::Value>(&format!("{base}/bad"), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(e, UpstreamError::Malformed { .. }));

        let e = c
            .get_json::<serde_json::Value>(&format!("{base}/err"), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(e, UpstreamError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn errors_never_echo_query_secrets() {
        let e = client(0)
            .get_json::<serde_json::Value>(
                "http://127.0.0.1:1/api",
                &[("apikey", "SECRETKEY123".to_string())],
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(e, UpstreamError::Unavailable { .. }));
        let msg = e.to_string();
        assert!(!msg.contains("SECRETKEY123"), "{msg}");
        assert!(!format!("{e:?}").contains("SECRETKEY123"));
    }

    #[tokio::test]
    async fn times_out_slow_hosts() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "late"
            }),
        );
        let base = serve(app).await;
        let e = client(0)
            .get_json::<serde_json::Value>(&format!("{base}/slow"), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(e, UpstreamError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn spaces_requests_to_the_same_host() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/n",
            get(move || {
                let h = h.clone();
                async move { Json(h.fetch_add(1, Ordering::SeqCst)) }
            }),
        );
        let base = serve(app).await;
        let c = client(150);
        let url = format!("{base}/n");

        let started = std::time::Instant::now();
        let (a, b, d) = tokio::join!(
            c.get_json::<usize>(&url, &[], &[]),
            c.get_json::<usize>(&url, &[], &[]),
            c.get_json::<usize>(&url, &[], &[]),
        );
        assert!(a.is_ok() && b.is_ok() && d.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
