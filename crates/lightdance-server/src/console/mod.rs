//! Interactive consoles
//!
//! Stdin is read on its own OS thread and forwarded line by line, so the
//! async consoles can wait on input and the shutdown signal together.

pub mod dispatch;
pub mod operator;

use std::io::{BufRead, Write};

use lightdance_core::run_with_shutdown;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

pub use dispatch::{DispatchConsole, DispatchDefaults, DispatchRequest, PromptError, render_report};
pub use operator::{ConsoleInput, OPERATOR_HELP, OperatorConsole, render_outcome};

const STDIN_QUEUE: usize = 16;

/// Start the stdin reader thread.
///
/// The channel closes when stdin reaches EOF or fails.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(STDIN_QUEUE);

    std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        break;
                    }
                }
            }
        })?;

    Ok(rx)
}

/// Wait for the next input line, `None` once input closed or shutdown fired
pub(crate) async fn next_line(
    lines: &mut mpsc::Receiver<String>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<String> {
    run_with_shutdown(lines.recv(), shutdown).await.flatten()
}

pub(crate) fn prompt(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{}", text);
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use lightdance_core::ShutdownSignal;

    use super::*;

    #[tokio::test]
    async fn test_next_line_stops_on_shutdown() {
        let shutdown = ShutdownSignal::new();
        let mut shutdown_rx = shutdown.subscribe();
        let (tx, mut lines) = mpsc::channel(1);

        tx.send("pause".to_string()).await.unwrap();
        assert_eq!(
            next_line(&mut lines, &mut shutdown_rx).await.as_deref(),
            Some("pause")
        );

        shutdown.shutdown();
        assert_eq!(next_line(&mut lines, &mut shutdown_rx).await, None);
        drop(tx);
    }

    #[tokio::test]
    async fn test_next_line_ends_with_input() {
        let shutdown = ShutdownSignal::new();
        let mut shutdown_rx = shutdown.subscribe();
        let (tx, mut lines) = mpsc::channel::<String>(1);
        drop(tx);

        assert_eq!(next_line(&mut lines, &mut shutdown_rx).await, None);
    }
}
