// Process signal handling
// Turns Ctrl+C or SIGTERM into the shared shutdown signal

use lightdance_core::ShutdownSignal;
use tracing::{info, warn};

/// Fire `shutdown` on the first Ctrl+C or SIGTERM
pub fn watch_shutdown_signals(shutdown: ShutdownSignal) {
    let mut stopped = shutdown.subscribe();
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down");
            }
            _ = stopped.recv() => return,
        }

        shutdown.shutdown();
    });
}
