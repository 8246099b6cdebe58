pub mod config;

pub use config::{Cli, Commands, Configuration, DispatchArgs};
