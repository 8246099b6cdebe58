//! Lightdance Core - Node connections, clock sync and command fan-out
//!
//! This crate provides:
//! - The newline-delimited JSON frame protocol spoken with nodes
//! - Node registry keyed by peer address
//! - Per-connection handlers answering sync requests
//! - The command router driven by the operator console
//! - The connectionless broadcast dispatcher with acknowledgment collection

pub mod codec;
pub mod handler;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use codec::{FrameDecoder, FrameError, MAX_FRAME_LENGTH};
pub use handler::connection::{ConnectionConfig, ConnectionHandler};
pub use handler::sync::{SyncReply, SyncSample};
pub use model::{AckDatagram, CommandDatagram, Frame};
pub use service::dispatch::{BroadcastDispatcher, DispatchConfig, DispatchError, DispatchReport};
pub use service::registry::{BroadcastOutcome, DeliveryError, NodeHandle, NodeRegistry};
pub use service::router::{Action, CommandRouter, RouteError, RouteOutcome, RoutedCommand, Target, route};
pub use service::server::NodeServer;
pub use service::shutdown::{ShutdownSignal, run_with_shutdown};
