//! Full wiring from config: a mock BscScan serves a USDT transfer and one
//! worker cycle credits the matching deposit.

use axum::extract::Query;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use payment_reconciler::asset::AssetClass;
use payment_reconciler::config::AppConfig;
use payment_reconciler::models::PaymentState;
use payment_reconciler::notify::RecordingNotifier;
use payment_reconciler::Reconciler;

const WALLET: &str = "0x4a998ce0877924feb7af749de60b644e1c39dad4";
const USDT_BEP20: &str = "0x55d398326f99059ff775485246999027b3197955";

async fn mock_bscscan() -> String {
    let app = Router::new().route(
        "/api",
        get(|Query(q): Query<HashMap<String, String>>| async move {
            let ts = (Utc::now().timestamp() + 5).to_string();
            match q.get("action").map(String::as_str) {
                Some("tokentx") => Json(json!({"status": "1", "message": "OK", "result": [
                    {"hash": "0xUSDT", "to": WALLET, "value": "25000000000000000000",
                     "timeStamp": ts, "contractAddress": USDT_BEP20, "tokenDecimal": "18"}
                ]})),
                _ => Json(json!({"status": "0", "message": "No transactions found", "result": []})),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

#[tokio::test]
async fn configured_explorer_feeds_the_worker() {
    let url = mock_bscscan().await;
    let tmp = tempfile::TempDir::new().unwrap();
    let toml = format!(
        r#"
[storage]
db_path = "{db}"

[worker]
per_payment_delay_ms = 0

[http]
per_host_spacing_ms = 0

[wallets]
evm = "{WALLET}"

[explorers]
bscscan_url = "{url}"
bscscan_api_key = "test"
"#,
        db = tmp.path().display(),
    );
    let cfg = AppConfig::from_toml_str(&toml)
        .unwrap()
        .resolved_with(&|_| None)
        .unwrap();
    let db = sled::open(&cfg.db_path).unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let app = Reconciler::build(&cfg, &db, notifier.clone()).unwrap();

    let intent = app
        .deposits
        .create_deposit("99", Decimal::new(25, 0), AssetClass::UsdtBep20)
        .await
        .unwrap();
    assert_eq!(intent.payment.wallet_address, WALLET);

    let report = app.worker.run_cycle().await.unwrap();
    assert_eq!(report.matched, 1, "{report:?}");

    let status = app.deposits.get_payment_status(&intent.payment.id).unwrap();
    assert_eq!(status.payment.state, PaymentState::Completed);
    assert_eq!(status.credit.unwrap().tx_id, "0xUSDT");
    assert_eq!(app.deposits.balance("99").unwrap().balance_usd, Decimal::new(25, 0));
    assert_eq!(notifier.events().len(), 1);
}
