//! Control plane services
//!
//! Long-lived pieces shared between the node server and the operator console.

pub mod dispatch;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
