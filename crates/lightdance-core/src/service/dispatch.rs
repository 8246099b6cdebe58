//! Connectionless command dispatch with acknowledgment collection.
//!
//! One call sends a command datagram per node id, then listens for
//! acknowledgments until every expected id has answered or one absolute
//! deadline passes. Nodes that stay silent end up in
//! [`DispatchReport::missing`]; nothing is retried.
//!
//! The ack socket is bound before the first datagram leaves so early acks
//! are queued by the OS, while the wait window starts after the last send.

use std::{
    collections::BTreeSet,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use lightdance_common::{DEFAULT_ACK_PORT, DEFAULT_COMMAND_PORT, local_ip};
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, info, warn};

use crate::model::{AckDatagram, CommandDatagram};

const ACK_BUFFER_SIZE: usize = 1024;

/// Configuration for the broadcast dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Port nodes listen on for command datagrams
    pub command_port: u16,
    /// Port acknowledgments are collected on, 0 picks a free one
    pub ack_port: u16,
    /// Address nodes are told to acknowledge to
    pub ack_ip: IpAddr,
    /// Delay written into each datagram for the node to apply
    pub delay_ms: u64,
    /// Gap between consecutive datagrams
    pub pacing: Duration,
    /// How long acknowledgments are awaited after the last send
    pub ack_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_port: DEFAULT_COMMAND_PORT,
            ack_port: DEFAULT_ACK_PORT,
            ack_ip: local_ip(),
            delay_ms: 10_000,
            pacing: Duration::from_millis(50),
            ack_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to bind {role} socket on {addr}: {source}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        source: io::Error,
    },

    #[error("failed to enable broadcast on command socket: {0}")]
    Broadcast(io::Error),
}

/// Outcome of one dispatch call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub session: u64,
    pub received: BTreeSet<String>,
    /// Expected ids that never acknowledged
    pub missing: BTreeSet<String>,
    /// Ids that acknowledged without being asked
    pub unexpected: BTreeSet<String>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Acknowledgment bookkeeping for one dispatch call
struct BroadcastSession {
    session_id: u64,
    expected: BTreeSet<String>,
    received: BTreeSet<String>,
    unexpected: BTreeSet<String>,
}

impl BroadcastSession {
    fn new(session_id: u64, node_ids: &[String]) -> Self {
        Self {
            session_id,
            expected: node_ids.iter().cloned().collect(),
            received: BTreeSet::new(),
            unexpected: BTreeSet::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.received.len() == self.expected.len()
    }

    fn accept(&mut self, payload: &[u8], from: SocketAddr) {
        let ack = match serde_json::from_slice::<AckDatagram>(payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(from = %from, error = %e, "Discarding malformed ack");
                return;
            }
        };

        if let Some(session) = ack.session_id()
            && session != self.session_id
        {
            debug!(from = %from, session, current = self.session_id, "Ignoring ack from another session");
            return;
        }

        match ack.id {
            Some(id) if !id.is_empty() => {
                info!(from = %from, node_id = %id, "Ack received");
                if self.expected.contains(&id) {
                    self.received.insert(id);
                } else {
                    self.unexpected.insert(id);
                }
            }
            _ => debug!(from = %from, "Ignoring ack without node id"),
        }
    }

    fn into_report(self) -> DispatchReport {
        let missing = self.expected.difference(&self.received).cloned().collect();
        DispatchReport {
            session: self.session_id,
            received: self.received,
            missing,
            unexpected: self.unexpected,
        }
    }
}

/// Sends commands to nodes over UDP and collects their acknowledgments.
#[derive(Debug, Clone, Default)]
pub struct BroadcastDispatcher {
    config: DispatchConfig,
}

impl BroadcastDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Send `command` to every id in `node_ids` via `target_ip` and wait for acks.
    ///
    /// Returns after all expected ids acknowledged or the ack window closed,
    /// whichever comes first. Only socket setup failures are errors.
    pub async fn dispatch(
        &self,
        target_ip: IpAddr,
        command: &str,
        node_ids: &[String],
    ) -> Result<DispatchReport, DispatchError> {
        let session_id = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut session = BroadcastSession::new(session_id, node_ids);

        let ack_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.ack_port);
        let ack_socket = bind(ack_addr, "ack").await?;
        let ack_port = ack_socket
            .local_addr()
            .map_err(|source| DispatchError::Bind {
                role: "ack",
                addr: ack_addr,
                source,
            })?
            .port();

        let send_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let send_socket = bind(send_addr, "command").await?;
        send_socket
            .set_broadcast(true)
            .map_err(DispatchError::Broadcast)?;

        let destination = SocketAddr::new(target_ip, self.config.command_port);
        info!(
            session = session_id,
            destination = %destination,
            command,
            nodes = node_ids.len(),
            "Dispatching command"
        );

        for (seq, node_id) in node_ids.iter().enumerate() {
            if seq > 0 {
                tokio::time::sleep(self.config.pacing).await;
            }
            self.send_one(&send_socket, destination, node_id, command, seq, session_id, ack_port)
                .await;
        }
        drop(send_socket);

        if !session.is_complete() {
            info!(session = session_id, "Waiting for acks");
            let deadline = Instant::now() + self.config.ack_timeout;
            let socket = &ack_socket;
            collect_acks(&mut session, deadline, move || async move {
                let mut buf = [0u8; ACK_BUFFER_SIZE];
                let (len, from) = socket.recv_from(&mut buf).await?;
                Ok((buf[..len].to_vec(), from))
            })
            .await;
        }

        let report = session.into_report();
        if report.is_complete() {
            info!(session = session_id, "All acks received");
        } else {
            warn!(session = session_id, missing = ?report.missing, "Missing acks");
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_one(
        &self,
        socket: &UdpSocket,
        destination: SocketAddr,
        node_id: &str,
        command: &str,
        seq: usize,
        session: u64,
        ack_port: u16,
    ) {
        let datagram = CommandDatagram {
            target: node_id.to_string(),
            cmd: command.to_string(),
            seq,
            delay_ms: self.config.delay_ms,
            session,
            ack_ip: self.config.ack_ip,
            ack_port,
        };

        let payload = match serde_json::to_vec(&datagram) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(node_id, error = %e, "Failed to encode command datagram");
                return;
            }
        };

        match socket.send_to(&payload, destination).await {
            Ok(_) => info!(node_id, seq, destination = %destination, "Command datagram sent"),
            Err(e) => warn!(node_id, seq, error = %e, "Failed to send command datagram"),
        }
    }
}

/// Feed received acks into `session` until it completes, `deadline` passes,
/// or the receiver fails.
async fn collect_acks<R, Fut>(session: &mut BroadcastSession, deadline: Instant, mut recv: R)
where
    R: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(Vec<u8>, SocketAddr)>>,
{
    while !session.is_complete() {
        match tokio::time::timeout_at(deadline, recv()).await {
            Ok(Ok((payload, from))) => session.accept(&payload, from),
            Ok(Err(e)) => {
                warn!(session = session.session_id, error = %e, "Ack receive failed, closing ack window");
                break;
            }
            Err(_) => {
                info!(session = session.session_id, "Ack window closed");
                break;
            }
        }
    }
}

async fn bind(addr: SocketAddr, role: &'static str) -> Result<UdpSocket, DispatchError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| DispatchError::Bind { role, addr, source })
}
