//! Cooperative shutdown plumbing
//!
//! Each service binary owns a root [`CancellationToken`]; every long-running
//! task takes a child token and returns promptly when it fires. Shutdown is
//! complete once the task group drains.

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Create the root shutdown token and wire it to SIGINT/SIGTERM.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Failed to listen for interrupt signal");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => warn!("Received interrupt; shutting down"),
            _ = terminate => warn!("Received SIGTERM; shutting down"),
        }
        signal_token.cancel();
    });

    token
}
