use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use payment_reconciler::config::{defaults, AppConfig};
use payment_reconciler::notify::LogNotifier;
use payment_reconciler::routes;
use payment_reconciler::shutdown::ShutdownCoordinator;
use payment_reconciler::Reconciler;

#[derive(Parser, Debug)]
#[command(name = "payment-reconciler", version, about = "Multi-chain deposit reconciler")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = defaults::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API and the reconciliation worker (default)
    Serve,

    /// Verify one payment now and print the outcome
    Verify {
        /// Payment id
        payment_id: String,
    },

    /// Expire every open payment past the polling horizon, then exit
    Expire,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let cfg = AppConfig::load_from(&cli.config)
        .and_then(|c| c.resolved())
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let db = sled::open(&cfg.db_path)
        .with_context(|| format!("opening database at {}", cfg.db_path.display()))?;
    let app = Reconciler::build(&cfg, &db, Arc::new(LogNotifier))?;

    match cli.cmd.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(app, cfg, db).await,
        Commands::Verify { payment_id } => {
            let outcome = app.deposits.force_verify(&payment_id).await?;
            let status = app.deposits.get_payment_status(&payment_id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "outcome": outcome,
                    "status": status,
                }))?
            );
            db.flush_async().await?;
            Ok(())
        }
        Commands::Expire => {
            let n = app.worker.expire_stale(chrono::Utc::now()).await?;
            info!(expired = n, "expiry pass done");
            db.flush_async().await?;
            Ok(())
        }
    }
}

async fn serve(
    app: Reconciler,
    cfg: payment_reconciler::config::ResolvedConfig,
    db: sled::Db,
) -> anyhow::Result<()> {
    let admin_token_mask = match &cfg.admin_token {
        Some(t) => format!("set (len={})", t.len()),
        None => "unset".to_string(),
    };
    info!(
        db = %cfg.db_path.display(),
        bind = %cfg.bind,
        admin_token = %admin_token_mask,
        wallets = cfg.deposits.wallets.len(),
        "payment reconciler starting up"
    );

    let shutdown = ShutdownCoordinator::new(db);
    let router = routes::build_router(app.app_state(cfg.admin_token.clone()), &cfg.cors_origins);

    let oracle = app.oracle.clone();
    tokio::spawn(async move { oracle.warm().await });

    let token = shutdown.token();
    let worker = tokio::spawn(async move {
        app.worker.run(token).await;
    });

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    info!(listen = %cfg.bind, "HTTP API listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.wait_for_signal().await })
        .await
        .context("http server")?;

    shutdown.trigger();
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "worker task panicked");
    }
    shutdown.finish().await;
    Ok(())
}
