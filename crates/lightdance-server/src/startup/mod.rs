//! Application startup utilities module.

mod app;
mod logging;
mod shutdown;

pub use app::{dispatch, serve};
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::watch_shutdown_signals;
