//! File-based logging with per-component log files.
//!
//! | Log File        | Component                   | Target Prefixes                                       |
//! |-----------------|-----------------------------|-------------------------------------------------------|
//! | lightdance.log  | Root logger (all components) | (all)                                                 |
//! | connection.log  | Node connections and sync   | lightdance_core::handler, lightdance_core::service::server |
//! | router.log      | Operator command routing    | lightdance_core::service::router                      |
//! | dispatch.log    | UDP dispatch and acks       | lightdance_core::service::dispatch                    |
//!
//! Log files are stored in `~/lightdance/logs` by default.

use std::{path::PathBuf, str::FromStr};

use lightdance_common::LightdanceError;
use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::{LevelFilter, Targets},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const ROOT_LOG_FILE: &str = "lightdance.log";

struct ComponentLogDef {
    file_name: &'static str,
    /// Target module prefixes routed to this file
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "connection.log",
        targets: &["lightdance_core::handler", "lightdance_core::service::server"],
    },
    ComponentLogDef {
        file_name: "router.log",
        targets: &["lightdance_core::service::router"],
    },
    ComponentLogDef {
        file_name: "dispatch.log",
        targets: &["lightdance_core::service::dispatch"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    /// Single file, never rotated
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

impl FromStr for LogRotation {
    type Err = LightdanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(LogRotation::Daily),
            "hourly" => Ok(LogRotation::Hourly),
            "never" => Ok(LogRotation::Never),
            other => Err(LightdanceError::IllegalArgument(format!(
                "unknown log rotation '{}'",
                other
            ))),
        }
    }
}

/// Logging configuration for the entire application.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log directory (default: `~/lightdance/logs`)
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    /// Create from application configuration.
    pub fn from_config(
        log_dir: Option<String>,
        console_output: bool,
        file_logging: bool,
        level: String,
    ) -> Self {
        let log_dir = log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir);
        let level = level.parse().unwrap_or(Level::INFO);

        Self {
            log_dir,
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/lightdance/logs", home))
}

/// Keeps the non-blocking file writers alive.
///
/// Dropping it flushes buffered log output, so hold it until `main` returns.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Initialize console output, the root log file and the component log files.
///
/// `RUST_LOG` overrides the configured level for the console and root file.
/// Component files capture everything from their targets.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LightdanceError> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir).map_err(|e| {
            LightdanceError::LoggingError(format!(
                "failed to create log directory {}: {}",
                config.log_dir.display(),
                e
            ))
        })?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender =
            RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_ansi(false)
                .with_filter(component_targets(component));
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LightdanceError::LoggingError(format!("failed to initialize logging: {}", e)))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

fn component_targets(component: &ComponentLogDef) -> Targets {
    component
        .targets
        .iter()
        .fold(Targets::new(), |targets, target| {
            targets.with_target(*target, LevelFilter::TRACE)
        })
}
