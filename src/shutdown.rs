//! Graceful shutdown: CTRL+C or SIGTERM cancels the shared token, the
//! worker and HTTP server wind down, and sled is flushed last.

use sled::Db;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    db: Db,
}

impl ShutdownCoordinator {
    pub fn new(db: Db) -> Self {
        Self {
            token: CancellationToken::new(),
            db,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Resolves once a termination signal arrives (or `trigger` is called),
    /// after cancelling the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for CTRL+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("CTRL+C received, shutting down"),
            _ = terminate => tracing::info!("SIGTERM received, shutting down"),
            _ = self.token.cancelled() => {}
        }
        self.token.cancel();
    }

    /// Flush sled after all writers have stopped.
    pub async fn finish(&self) {
        match self.db.flush_async().await {
            Ok(bytes) => tracing::info!(bytes, "database flushed"),
            Err(e) => tracing::error!(error = %e, "database flush failed"),
        }
    }
}
