// Operator console for the node server
// Feeds console lines to the command router and prints what happened

use lightdance_core::{CommandRouter, RouteOutcome, ShutdownSignal};
use tokio::sync::mpsc;
use tracing::info;

use super::{next_line, prompt};

const PROMPT: &str = "SERVER> ";

pub const OPERATOR_HELP: &str = "\
Commands:
  play <seconds>      Sync all nodes, then start playback after <seconds>
  pause               Pause playback
  stop                Stop playback
  restart             Restart playback
  list                List connected nodes
  ledtest [...]       Run the LED test with optional arguments
  oftest [...]        Run the optical fiber test with optional arguments
  help                Show this help
  exit / quit         Stop the server

Prefix a command with a node address to target one node:
  192.168.1.42: pause
";

/// How the console treats one line before it reaches the router
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput<'a> {
    Blank,
    Help,
    /// `exit` or `quit` on their own end the session
    Exit,
    Command(&'a str),
}

impl<'a> ConsoleInput<'a> {
    pub fn classify(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ConsoleInput::Blank;
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "exit" | "quit" => ConsoleInput::Exit,
            "help" => ConsoleInput::Help,
            _ => ConsoleInput::Command(trimmed),
        }
    }
}

/// Console text for a routed command, `None` when logs say enough
pub fn render_outcome(outcome: &RouteOutcome) -> Option<String> {
    match outcome {
        RouteOutcome::Listed(nodes) if nodes.is_empty() => Some("No nodes connected".to_string()),
        RouteOutcome::Listed(nodes) => Some(
            nodes
                .iter()
                .map(|(addr, handle)| {
                    format!(
                        "{}, {} (connected {})",
                        addr,
                        handle.remote_addr,
                        handle.connected_at.format("%Y-%m-%d %H:%M:%S")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        RouteOutcome::Delivered(_) => None,
        RouteOutcome::Dropped { error, .. } => Some(format!("Not sent: {}", error)),
        RouteOutcome::Broadcast(outcome) if outcome.is_complete() => None,
        RouteOutcome::Broadcast(outcome) => Some(format!(
            "Sent to {} node(s), {} failed",
            outcome.delivered.len(),
            outcome.failed.len()
        )),
    }
}

pub struct OperatorConsole {
    router: CommandRouter,
    shutdown: ShutdownSignal,
}

impl OperatorConsole {
    pub fn new(router: CommandRouter, shutdown: ShutdownSignal) -> Self {
        Self { router, shutdown }
    }

    /// Serve console lines until `exit`, end of input, or shutdown.
    ///
    /// Leaving the loop fires the shutdown signal.
    pub async fn run(&self, mut lines: mpsc::Receiver<String>) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if self.shutdown.is_shutdown() {
                break;
            }
            prompt(PROMPT);
            let Some(line) = next_line(&mut lines, &mut shutdown_rx).await else {
                break;
            };
            if !self.handle_line(&line).await {
                info!("Operator quit");
                break;
            }
        }

        self.shutdown.shutdown();
    }

    /// Handle one line, returning `false` when the session should end
    pub async fn handle_line(&self, line: &str) -> bool {
        match ConsoleInput::classify(line) {
            ConsoleInput::Blank => {}
            ConsoleInput::Help => print!("{}", OPERATOR_HELP),
            ConsoleInput::Exit => return false,
            ConsoleInput::Command(command) => match self.router.submit(command).await {
                Ok(outcome) => {
                    if let Some(text) = render_outcome(&outcome) {
                        println!("{}", text);
                    }
                }
                Err(e) => println!("{}", e),
            },
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use lightdance_core::{BroadcastOutcome, DeliveryError, Frame, NodeHandle, NodeRegistry};

    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(ConsoleInput::classify("   "), ConsoleInput::Blank);
        assert_eq!(ConsoleInput::classify(" EXIT "), ConsoleInput::Exit);
        assert_eq!(ConsoleInput::classify("quit"), ConsoleInput::Exit);
        assert_eq!(ConsoleInput::classify("help"), ConsoleInput::Help);
        assert_eq!(
            ConsoleInput::classify("10.0.0.2: quit"),
            ConsoleInput::Command("10.0.0.2: quit")
        );
        assert_eq!(
            ConsoleInput::classify(" play 10 "),
            ConsoleInput::Command("play 10")
        );
    }

    #[test]
    fn test_render_outcome() {
        assert_eq!(
            render_outcome(&RouteOutcome::Listed(Vec::new())).as_deref(),
            Some("No nodes connected")
        );

        let addr: IpAddr = "10.0.0.9".parse().unwrap();
        let error = DeliveryError::NotConnected(addr);
        assert_eq!(
            render_outcome(&RouteOutcome::Dropped {
                target: addr,
                error
            })
            .as_deref(),
            Some("Not sent: node 10.0.0.9 is not connected")
        );

        let partial = BroadcastOutcome {
            delivered: vec!["10.0.0.1".parse().unwrap()],
            failed: vec![(addr, DeliveryError::Closed(addr))],
        };
        assert_eq!(
            render_outcome(&RouteOutcome::Broadcast(partial)).as_deref(),
            Some("Sent to 1 node(s), 1 failed")
        );
        assert_eq!(render_outcome(&RouteOutcome::Delivered(addr)), None);
    }

    #[test]
    fn test_render_listing() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = NodeHandle::new(3, "10.0.0.4:50000".parse().unwrap(), tx);
        let text = render_outcome(&RouteOutcome::Listed(vec![(handle.remote_addr.ip(), handle)]))
            .unwrap();
        assert!(text.starts_with("10.0.0.4, 10.0.0.4:50000 (connected "));
    }

    #[tokio::test]
    async fn test_console_routes_until_exit() {
        let registry = NodeRegistry::new();
        let (tx, mut node_rx) = mpsc::channel(8);
        let handle = NodeHandle::new(1, "10.0.0.5:41000".parse().unwrap(), tx);
        registry.register(handle.remote_addr.ip(), handle);

        let shutdown = ShutdownSignal::new();
        let console = OperatorConsole::new(CommandRouter::new(registry), shutdown.clone());

        let (line_tx, line_rx) = mpsc::channel(8);
        for line in ["", "pause", "play abc", "exit", "stop"] {
            line_tx.send(line.to_string()).await.unwrap();
        }

        console.run(line_rx).await;

        assert!(shutdown.is_shutdown());
        assert_eq!(
            node_rx.try_recv().unwrap(),
            Frame::command(vec!["play-action".into(), "pause".into()])
        );
        assert!(node_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_console_stops_when_input_closes() {
        let shutdown = ShutdownSignal::new();
        let console = OperatorConsole::new(CommandRouter::new(NodeRegistry::new()), shutdown.clone());

        let (line_tx, line_rx) = mpsc::channel::<String>(1);
        drop(line_tx);

        console.run(line_rx).await;
        assert!(shutdown.is_shutdown());
    }
}
