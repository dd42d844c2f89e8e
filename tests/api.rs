
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use tower::ServiceExt;

use harness::{harness, Harness, ADMIN_TOKEN};
use payment_reconciler::routes::{build_router, security::ADMIN_TOKEN_HEADER};

fn router(h: &Harness) -> Router {
    build_router(h.app.app_state(Some(ADMIN_TOKEN.to_string())), &[])
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn amount(v: &Value) -> Decimal {
    Decimal::from_str(v.as_str().unwrap()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_post(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut b = Request::post(uri).header("content-type", "application/json");
    if let Some(t) = token {
        b = b.header(ADMIN_TOKEN_HEADER, t);
    }
    b.body(Body::from(body.to_string())).unwrap()
}

async fn create(h: &Harness, user: &str, usd: &str, asset: &str) -> (StatusCode, Value) {
    call(
        router(h),
        post_json(
            "/deposits",
            json!({ "user_id": user, "usd_amount": usd, "asset_class": asset }),
        ),
    )
    .await
}

#[tokio::test]
async fn create_then_poll_status() {
    let h = harness();
    let (status, body) = create(&h, "42", "25", "USDT_BEP20").await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["payment"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["payment"]["state"], "pending");
    assert_eq!(body["payment"]["wallet_address"], harness::EVM_WALLET);
    assert_eq!(amount(&body["quote"]["expected_amount"]), Decimal::new(25, 0));
    assert!(body["payment"]["reference_memo"].is_null());

    let (status, body) = call(
        router(&h),
        Request::get(format!("/deposits/{id}")).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment"]["id"], id.as_str());
    assert!(body["credit"].is_null());
}

#[tokio::test]
async fn ton_deposit_carries_a_reference_memo() {
    let h = harness();
    let (status, body) = create(&h, "7", "10", "TON").await;
    assert_eq!(status, StatusCode::CREATED);
    let memo = body["payment"]["reference_memo"].as_str().unwrap();
    assert!(memo.starts_with("deposit_7_"), "{memo}");
    assert_eq!(amount(&body["quote"]["expected_amount"]), Decimal::new(2, 0));
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let h = harness();
    let (status, body) = create(&h, "42", "25", "DOGE").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    let (status, _) = create(&h, "42", "0.50", "USDT_BEP20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No Solana wallet in the test config.
    let (status, _) = create(&h, "42", "25", "SOL").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        router(&h),
        Request::get("/deposits/missing").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_the_token() {
    let h = harness();
    let (_, body) = create(&h, "42", "25", "USDT_BEP20").await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();
    let uri = format!("/admin/deposits/{id}/complete");

    let (status, _) = call(router(&h), admin_post(&uri, json!({ "tx_id": "0x1" }), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) =
        call(router(&h), admin_post(&uri, json!({ "tx_id": "0x1" }), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.app.verifier.ledger().credit_count(), 0);

    let (status, body) =
        call(router(&h), admin_post(&uri, json!({ "tx_id": "0x1" }), Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment"]["state"], "completed");
    assert_eq!(body["credit"]["tx_id"], "0x1");

    let (status, body) = call(
        router(&h),
        Request::get("/users/42/balance").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["balance_usd"]), Decimal::new(25, 0));
    assert_eq!(body["deposits"].as_array().unwrap().len(), 1);

    // Rejecting a completed payment is a conflict.
    let (status, _) = call(
        router(&h),
        admin_post(
            &format!("/admin/deposits/{id}/reject"),
            json!({}),
            Some(ADMIN_TOKEN),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_routes_are_closed_without_a_configured_token() {
    let h = harness();
    let open = || build_router(h.app.app_state(None), &[]);
    let (_, body) = call(
        open(),
        post_json(
            "/deposits",
            json!({ "user_id": "mallory", "usd_amount": "5000", "asset_class": "USDT_BEP20" }),
        ),
    )
    .await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();

    for action in ["complete", "verify", "reject"] {
        let uri = format!("/admin/deposits/{id}/{action}");
        let (status, _) = call(open(), admin_post(&uri, json!({ "tx_id": "0xmadeup" }), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{action}");
        let (status, _) =
            call(open(), admin_post(&uri, json!({ "tx_id": "0xmadeup" }), Some(""))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{action}");
    }

    assert_eq!(h.app.verifier.ledger().credit_count(), 0);
    assert_eq!(
        h.app.verifier.ledger().balance_of("mallory").unwrap(),
        Decimal::ZERO
    );
    let stored = h.app.verifier.store().require(&id).unwrap();
    assert_eq!(stored.state, payment_reconciler::models::PaymentState::Pending);
}

#[tokio::test]
async fn reject_then_verify_is_a_conflict() {
    let h = harness();
    let (_, body) = create(&h, "42", "25", "USDT_BEP20").await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        router(&h),
        admin_post(
            &format!("/admin/deposits/{id}/reject"),
            json!({ "reason": "duplicate request" }),
            Some(ADMIN_TOKEN),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");
    assert_eq!(body["failure_reason"], "duplicate request");

    let (status, _) = call(
        router(&h),
        admin_post(&format!("/admin/deposits/{id}/verify"), json!({}), Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn tx_hint_moves_payment_to_verifying() {
    let h = harness();
    let (_, body) = create(&h, "42", "25", "USDT_BEP20").await;
    let id = body["payment"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        router(&h),
        post_json(&format!("/deposits/{id}/tx"), json!({ "tx_id": "0xclaimed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "verifying");
    assert_eq!(body["claimed_tx_id"], "0xclaimed");

    let (status, body) = call(
        router(&h),
        admin_post(&format!("/admin/deposits/{id}/verify"), json!({}), Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "not_found");
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let h = harness();
    let (status, body) = call(
        router(&h),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(body["assets"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a == "TON"));

    let (status, _) = call(
        router(&h),
        Request::get("/oracle/prices").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let resp = router(&h)
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8_lossy(&text);
    assert!(text.contains("reconciler_cycles_total"), "{text}");
}
