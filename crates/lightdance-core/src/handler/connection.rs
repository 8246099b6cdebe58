// Per-connection handler for node connections
// Frames inbound bytes, answers sync requests and owns the connection's writer task

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use lightdance_common::day_micros;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{broadcast, mpsc},
};
use tracing::{debug, info, warn};

use crate::{
    codec::{FrameDecoder, MAX_FRAME_LENGTH},
    handler::sync::SyncReply,
    model::Frame,
    service::registry::{ConnectionId, NodeHandle, NodeRegistry},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Tunables for one node connection
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Frames that may wait for the writer before sends are rejected
    pub queue_capacity: usize,
    pub max_frame_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

/// Services node connections for their whole lifetime.
///
/// One `handle` call runs per connection. Handlers share nothing but the
/// registry.
#[derive(Clone)]
pub struct ConnectionHandler {
    registry: NodeRegistry,
    config: ConnectionConfig,
    // Day-clock source for sync timestamps
    clock: fn() -> u64,
}

impl ConnectionHandler {
    pub fn new(registry: NodeRegistry, config: ConnectionConfig) -> Self {
        Self {
            registry,
            config,
            clock: day_micros,
        }
    }

    pub async fn handle_tcp(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) -> ConnectionId {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(remote = %remote_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        self.handle(reader, writer, remote_addr, shutdown).await
    }

    /// Register the connection, run its read loop, and unregister on exit.
    ///
    /// Returns once the peer closes, an I/O error occurs, or shutdown fires.
    pub async fn handle<R, W>(
        &self,
        mut reader: R,
        writer: W,
        remote_addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) -> ConnectionId
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connection_id = next_connection_id();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let handle = NodeHandle::new(connection_id, remote_addr, tx);
        let node_ip = remote_addr.ip();

        if let Some(replaced) = self.registry.register(node_ip, handle.clone()) {
            info!(
                remote = %remote_addr,
                replaced = %replaced.remote_addr,
                "Node reconnected, replacing previous connection"
            );
        }
        info!(
            remote = %remote_addr,
            connection_id,
            nodes = self.registry.len(),
            "Node connected"
        );

        let writer_task = tokio::spawn(write_frames(writer, rx, remote_addr));
        let mut decoder = FrameDecoder::with_max_length(self.config.max_frame_length);
        let mut shutting_down = false;

        loop {
            tokio::select! {
                read = reader.read_buf(decoder.read_buffer()) => match read {
                    Ok(0) => {
                        info!(remote = %remote_addr, "Node closed connection");
                        break;
                    }
                    Ok(_) => self.process_frames(&mut decoder, &handle),
                    Err(e) => {
                        warn!(remote = %remote_addr, error = %e, "Node connection read failed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    debug!(remote = %remote_addr, "Closing node connection for shutdown");
                    shutting_down = true;
                    break;
                }
            }
        }

        self.registry.unregister_connection(&node_ip, connection_id);
        drop(handle);
        if shutting_down {
            writer_task.abort();
        }

        info!(
            remote = %remote_addr,
            connection_id,
            nodes = self.registry.len(),
            "Node disconnected"
        );
        connection_id
    }

    fn process_frames(&self, decoder: &mut FrameDecoder, handle: &NodeHandle) {
        while let Some(result) = decoder.next_frame() {
            match result {
                Ok(frame) => self.on_frame(frame, handle),
                Err(e) => warn!(
                    remote = %handle.remote_addr,
                    error = %e,
                    "Discarding malformed frame"
                ),
            }
        }
    }

    fn on_frame(&self, frame: Frame, handle: &NodeHandle) {
        match frame {
            Frame::Sync { t_1 } => {
                let t_2 = (self.clock)();
                let reply = SyncReply::from_readings(t_2, (self.clock)());
                match handle.send(reply.into()) {
                    Ok(()) => info!(
                        remote = %handle.remote_addr,
                        t_1 = ?t_1,
                        t_2 = reply.t_2,
                        t_3 = reply.t_3,
                        "Answered sync request"
                    ),
                    Err(e) => warn!(
                        remote = %handle.remote_addr,
                        error = %e,
                        "Failed to queue sync response"
                    ),
                }
            }
            other => debug!(
                remote = %handle.remote_addr,
                kind = other.kind(),
                "Ignoring frame from node"
            ),
        }
    }
}

/// Drain the connection's outbound queue into the socket, one line per frame.
///
/// Ends when every sender is gone or a write fails.
async fn write_frames<W>(mut writer: W, mut rx: mpsc::Receiver<Frame>, remote_addr: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let line = match frame.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!(remote = %remote_addr, error = %e, "Failed to encode frame");
                continue;
            }
        };

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(remote = %remote_addr, error = %e, "Node connection write failed");
            break;
        }
        debug!(remote = %remote_addr, kind = frame.kind(), "Frame written");
    }

    let _ = writer.shutdown().await;
}
