// TCP server accepting node connections
// One lightweight task per accepted connection; the task count is not capped

use std::{net::SocketAddr, time::Duration};

use lightdance_common::LightdanceError;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info};

use crate::{
    handler::connection::{ConnectionConfig, ConnectionHandler},
    service::{registry::NodeRegistry, shutdown::ShutdownSignal},
};

// Pause after a failed accept (e.g. out of file descriptors) before retrying
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct NodeServer {
    listener: TcpListener,
    registry: NodeRegistry,
    handler: ConnectionHandler,
}

impl NodeServer {
    /// Bind the listening socket. Failure here is fatal for the process.
    pub async fn bind(
        addr: SocketAddr,
        registry: NodeRegistry,
        config: ConnectionConfig,
    ) -> Result<Self, LightdanceError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LightdanceError::bind(addr, e))?;

        info!(addr = %listener.local_addr()?, "Node server listening");

        Ok(Self {
            listener,
            handler: ConnectionHandler::new(registry.clone(), config),
            registry,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Accept connections until shutdown, then drop every registered node.
    pub async fn run(self, shutdown: ShutdownSignal) {
        let shutdown_rx = shutdown.subscribe();
        self.accept_loop(shutdown, shutdown_rx).await;
    }

    /// Run on a new task, subscribed to `shutdown` before this returns.
    pub fn spawn(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(self.accept_loop(shutdown, shutdown_rx))
    }

    async fn accept_loop(self, shutdown: ShutdownSignal, mut shutdown_rx: broadcast::Receiver<()>) {
        while !shutdown.is_shutdown() {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        info!(remote = %remote_addr, "Starting handler for node");
                        let handler = self.handler.clone();
                        let handler_shutdown = shutdown.subscribe();
                        tokio::spawn(async move {
                            handler.handle_tcp(stream, remote_addr, handler_shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept node connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        let closed = self.registry.clear();
        info!(closed, "Node server stopped");
    }
}
