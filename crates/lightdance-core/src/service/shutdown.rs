//! Process-wide shutdown notification
//!
//! The accept loop and every connection handler subscribe; firing the
//! signal makes them stop and abandon in-flight I/O.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::broadcast;
use tracing::debug;

/// Shutdown signal sender and receiver
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with a broadcast channel
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a receiver for shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    /// Check if shutdown has been triggered
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a future until it completes or shutdown is signalled
///
/// The receiver is borrowed so one subscription can guard a sequence of steps.
pub async fn run_with_shutdown<F, T>(future: F, shutdown_rx: &mut broadcast::Receiver<()>) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        result = future => Some(result),
        _ = shutdown_rx.recv() => {
            debug!("Shutdown signal received, cancelling operation");
            None
        }
    }
}
