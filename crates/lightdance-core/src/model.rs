// Wire models exchanged with nodes
// Frames travel over the persistent connection, datagrams over UDP

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A frame on the persistent node connection.
///
/// Encoded as one JSON object per line with a `kind` discriminator:
///
/// ```text
/// {"kind":"sync","t_1":1234}
/// {"kind":"sync_resp","t_2":5000,"t_3":5003}
/// {"kind":"command","args":["play-action","pause"]}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Sync request. Nodes send it with their send time; the server sends it
    /// without a timestamp to ask nodes to start a handshake.
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        t_1: Option<u64>,
    },
    /// Sync response carrying the server receive and send instants.
    SyncResp { t_2: u64, t_3: u64 },
    /// Command for the node. `args[0]` names the action.
    Command {
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_time: Option<u64>,
    },
}

impl Frame {
    /// Server-initiated sync request
    pub fn sync_request() -> Self {
        Frame::Sync { t_1: None }
    }

    pub fn command(args: Vec<String>) -> Self {
        Frame::Command {
            args,
            send_time: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Sync { .. } => "sync",
            Frame::SyncResp { .. } => "sync_resp",
            Frame::Command { .. } => "command",
        }
    }

    /// Encode as a single newline-terminated line
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Command datagram sent to a node's command port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDatagram {
    /// Node identifier the command is meant for
    pub target: String,
    pub cmd: String,
    /// Position of this datagram within the dispatch call
    pub seq: usize,
    pub delay_ms: u64,
    pub session: u64,
    /// Where the node should send its acknowledgment
    pub ack_ip: IpAddr,
    pub ack_port: u16,
}

/// Acknowledgment datagram sent back by a node.
///
/// Only `id` is required. Firmware acks look like
/// `{"id":"ESP32_A","status":"ack"}`; unknown fields are ignored.
/// `session` is kept as raw JSON so a malformed value never costs the `id`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckDatagram {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<serde_json::Value>,
}

impl AckDatagram {
    /// Session echoed by the node, when it is an unsigned integer
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().and_then(serde_json::Value::as_u64)
    }
}
