// Subcommand entry points
// Wire configuration, the core services and the consoles together

use anyhow::Context;
use lightdance_core::{BroadcastDispatcher, CommandRouter, NodeRegistry, NodeServer, ShutdownSignal};
use tracing::info;

use crate::{
    console::{
        DispatchConsole, DispatchDefaults, DispatchRequest, OPERATOR_HELP, OperatorConsole,
        spawn_stdin_reader,
    },
    model::{Configuration, DispatchArgs},
};

use super::watch_shutdown_signals;

/// Run the node server with the operator console attached to stdin
pub async fn serve(configuration: &Configuration) -> anyhow::Result<()> {
    let shutdown = ShutdownSignal::new();
    watch_shutdown_signals(shutdown.clone());

    let registry = NodeRegistry::new();
    let server = NodeServer::bind(
        configuration.server_bind_addr()?,
        registry.clone(),
        configuration.connection_config(),
    )
    .await?;
    let server_task = server.spawn(shutdown.clone());

    let router =
        CommandRouter::new(registry).with_settle_interval(configuration.sync_settle_interval());
    let lines = spawn_stdin_reader().context("failed to start console input thread")?;

    print!("{}", OPERATOR_HELP);
    OperatorConsole::new(router, shutdown.clone()).run(lines).await;

    server_task.await.context("node server task failed")?;
    info!("Lightdance server stopped");
    Ok(())
}

/// Run one dispatch, or the interactive prompt loop when no command was given
pub async fn dispatch(configuration: &Configuration, args: DispatchArgs) -> anyhow::Result<()> {
    let dispatcher = BroadcastDispatcher::new(configuration.dispatch_config());

    let devices: Vec<String> = args
        .devices
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let defaults = DispatchDefaults {
        target_ip: args
            .target
            .unwrap_or_else(|| configuration.dispatch_target_ip()),
        devices: if devices.is_empty() {
            configuration.dispatch_devices()
        } else {
            devices
        },
    };

    match args.command {
        Some(command) => {
            let request = DispatchRequest::from_answers("", &command, "", &defaults)?;
            request.send(&dispatcher).await?;
        }
        None => {
            let shutdown = ShutdownSignal::new();
            watch_shutdown_signals(shutdown.clone());
            let lines = spawn_stdin_reader().context("failed to start console input thread")?;
            DispatchConsole::new(dispatcher, defaults, shutdown.clone())
                .run(lines)
                .await;
            shutdown.shutdown();
        }
    }

    Ok(())
}
