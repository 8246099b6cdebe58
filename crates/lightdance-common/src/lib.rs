//! Lightdance Common - Shared types, clock and utilities
//!
//! This crate provides the foundational pieces used across all Lightdance components:
//! - Setup error type
//! - The day clock used by the sync handshake
//! - Network helper functions
//! - Common constants

pub mod clock;
pub mod error;
pub mod utils;

// Re-exports for convenience
pub use clock::{DAY_MICROS, day_micros};
pub use error::LightdanceError;
pub use utils::local_ip;

/// Default TCP port nodes connect to
pub const DEFAULT_SERVER_PORT: u16 = 5000;

/// Default UDP port nodes listen on for dispatched commands
pub const DEFAULT_COMMAND_PORT: u16 = 12345;

/// Default UDP port the dispatcher listens on for acknowledgments
pub const DEFAULT_ACK_PORT: u16 = 3333;

/// Program name nodes hand playback commands to
pub const PLAY_ACTION: &str = "play-action";
