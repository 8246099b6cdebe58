//! Main entry point for the Lightdance control plane.

use clap::Parser;
use lightdance_server::{
    model::{Cli, Commands, Configuration},
    startup,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::from_cli(&cli)?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    match cli.command {
        Commands::Serve => startup::serve(&configuration).await,
        Commands::Dispatch(args) => startup::dispatch(&configuration, args).await,
    }
}
