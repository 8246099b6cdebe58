//! Node connection handling
//!
//! This module provides the per-connection read loop and the server side of
//! the clock sync handshake.

pub mod connection;
pub mod sync;
