//! Configuration management for Lightdance
//!
//! Sources are layered lowest precedence first: `conf/lightdance.yml` (or the
//! file named by `--config`), `LIGHTDANCE_` environment variables, then
//! command line overrides.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use lightdance_common::{
    DEFAULT_ACK_PORT, DEFAULT_COMMAND_PORT, DEFAULT_SERVER_PORT, LightdanceError, local_ip,
    utils::split_list,
};
use lightdance_core::{ConnectionConfig, DispatchConfig, MAX_FRAME_LENGTH};

use crate::startup::{LogRotation, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/lightdance.yml";
pub const ENV_PREFIX: &str = "LIGHTDANCE";

const DEFAULT_DEVICES: &str = "ESP32_A,ESP32_B";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "lightdance", version, about = "Timed command control plane for light show nodes")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Address the node server binds to
    #[arg(long = "host", global = true)]
    pub host: Option<String>,
    /// Port the node server listens on
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Accept node connections and read operator commands from stdin
    Serve,
    /// Send a command datagram to each device and collect acknowledgments
    Dispatch(DispatchArgs),
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Destination address, usually a broadcast address
    #[arg(long = "target")]
    pub target: Option<IpAddr>,
    /// Comma-separated device ids
    #[arg(long = "devices", value_delimiter = ',')]
    pub devices: Vec<String>,
    /// Command to send; prompts interactively when omitted
    pub command: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration for the parsed command line
    pub fn from_cli(cli: &Cli) -> Result<Self, LightdanceError> {
        Self::build(cli, env_source())
    }

    fn build(cli: &Cli, environment: Environment) -> Result<Self, LightdanceError> {
        let file = match &cli.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut builder = Config::builder().add_source(file).add_source(environment);

        if let Some(host) = &cli.host {
            builder = set_override(builder, "server.address", host.as_str())?;
        }
        if let Some(port) = cli.port {
            builder = set_override(builder, "server.port", i64::from(port))?;
        }
        if cli.debug {
            builder = set_override(builder, "logging.level", "debug")?;
        }

        let config = builder
            .build()
            .map_err(|e| LightdanceError::ConfigError(e.to_string()))?;

        Ok(Configuration { config })
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string("server.address")
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int("server.port")
            .ok()
            .and_then(|port| u16::try_from(port).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn server_bind_addr(&self) -> Result<SocketAddr, LightdanceError> {
        let address = self.server_address();
        let ip: IpAddr = address.parse().map_err(|_| {
            LightdanceError::ConfigError(format!("invalid server.address '{}'", address))
        })?;
        Ok(SocketAddr::new(ip, self.server_port()))
    }

    pub fn node_queue_capacity(&self) -> usize {
        self.config
            .get_int("server.node_queue_capacity")
            .ok()
            .and_then(|capacity| usize::try_from(capacity).ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(64)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            queue_capacity: self.node_queue_capacity(),
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }

    // ========================================================================
    // Router Configuration
    // ========================================================================

    pub fn sync_settle_interval(&self) -> Duration {
        Duration::from_millis(self.millis("router.sync_settle_ms", 100))
    }

    // ========================================================================
    // Dispatch Configuration
    // ========================================================================

    pub fn dispatch_target_ip(&self) -> IpAddr {
        self.config
            .get_string("dispatch.target_ip")
            .ok()
            .and_then(|ip| ip.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::BROADCAST))
    }

    pub fn dispatch_devices(&self) -> Vec<String> {
        if let Ok(values) = self.config.get_array("dispatch.devices") {
            return values
                .into_iter()
                .filter_map(|value| value.into_string().ok())
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
        }

        let devices = self
            .config
            .get_string("dispatch.devices")
            .unwrap_or(DEFAULT_DEVICES.to_string());
        split_list(&devices)
    }

    pub fn dispatch_ack_ip(&self) -> IpAddr {
        self.config
            .get_string("dispatch.ack_ip")
            .ok()
            .and_then(|ip| ip.parse().ok())
            .unwrap_or_else(local_ip)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            command_port: self.port("dispatch.command_port", DEFAULT_COMMAND_PORT),
            ack_port: self.port("dispatch.ack_port", DEFAULT_ACK_PORT),
            ack_ip: self.dispatch_ack_ip(),
            delay_ms: self.millis("dispatch.delay_ms", 10_000),
            pacing: Duration::from_millis(self.millis("dispatch.pacing_ms", 50)),
            ack_timeout: Duration::from_millis(self.millis("dispatch.ack_timeout_ms", 3_000)),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let mut logging = LoggingConfig::from_config(
            self.config.get_string("logging.dir").ok(),
            self.config.get_bool("logging.console").unwrap_or(true),
            self.config.get_bool("logging.file").unwrap_or(true),
            self.config
                .get_string("logging.level")
                .unwrap_or("info".to_string()),
        );
        if let Ok(rotation) = self.config.get_string("logging.rotation") {
            logging.rotation = rotation.parse().unwrap_or(LogRotation::Daily);
        }
        logging
    }

    fn port(&self, key: &str, default: u16) -> u16 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|port| u16::try_from(port).ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|ms| u64::try_from(ms).ok())
            .unwrap_or(default)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn set_override<T>(
    builder: ConfigBuilder<DefaultState>,
    key: &str,
    value: T,
) -> Result<ConfigBuilder<DefaultState>, LightdanceError>
where
    T: Into<config::Value>,
{
    builder
        .set_override(key, value)
        .map_err(|e| LightdanceError::ConfigError(format!("failed to override {}: {}", key, e)))
}
