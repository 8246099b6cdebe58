// Interactive front end for the broadcast dispatcher
// Prompts for target address, command and devices, then prints the ack report

use std::net::IpAddr;

use lightdance_common::utils::split_list;
use lightdance_core::{
    BroadcastDispatcher, DispatchError, DispatchReport, ShutdownSignal, run_with_shutdown,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{next_line, prompt};

/// Values used when a prompt is answered with an empty line
#[derive(Clone, Debug)]
pub struct DispatchDefaults {
    pub target_ip: IpAddr,
    pub devices: Vec<String>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("empty command, skipping")]
    EmptyCommand,

    #[error("invalid target address '{0}'")]
    InvalidTarget(String),

    #[error("no target devices")]
    NoDevices,
}

/// One fully answered dispatch prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRequest {
    pub target_ip: IpAddr,
    pub command: String,
    pub devices: Vec<String>,
}

impl DispatchRequest {
    pub fn from_answers(
        target: &str,
        command: &str,
        devices: &str,
        defaults: &DispatchDefaults,
    ) -> Result<Self, PromptError> {
        let target = target.trim();
        let target_ip = if target.is_empty() {
            defaults.target_ip
        } else {
            target
                .parse()
                .map_err(|_| PromptError::InvalidTarget(target.to_string()))?
        };

        let command = command.trim();
        if command.is_empty() {
            return Err(PromptError::EmptyCommand);
        }

        let devices = match split_list(devices) {
            answered if answered.is_empty() => defaults.devices.clone(),
            answered => answered,
        };
        if devices.is_empty() {
            return Err(PromptError::NoDevices);
        }

        Ok(Self {
            target_ip,
            command: command.to_string(),
            devices,
        })
    }

    pub async fn send(&self, dispatcher: &BroadcastDispatcher) -> Result<DispatchReport, DispatchError> {
        println!(
            "Sending '{}' to {} at {}",
            self.command,
            self.devices.join(", "),
            self.target_ip
        );
        let report = dispatcher
            .dispatch(self.target_ip, &self.command, &self.devices)
            .await?;
        println!("{}", render_report(&report));
        Ok(report)
    }
}

pub fn render_report(report: &DispatchReport) -> String {
    let mut lines = Vec::new();
    if !report.received.is_empty() {
        lines.push(format!("Acked: {}", join(&report.received)));
    }
    if report.is_complete() {
        lines.push("All acks received".to_string());
    } else {
        lines.push(format!("Missing acks from: {}", join(&report.missing)));
    }
    if !report.unexpected.is_empty() {
        lines.push(format!("Unexpected acks from: {}", join(&report.unexpected)));
    }
    lines.join("\n")
}

fn join<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    ids.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Prompt loop repeating target / command / devices until input closes
pub struct DispatchConsole {
    dispatcher: BroadcastDispatcher,
    defaults: DispatchDefaults,
    shutdown: ShutdownSignal,
}

impl DispatchConsole {
    pub fn new(dispatcher: BroadcastDispatcher, defaults: DispatchDefaults, shutdown: ShutdownSignal) -> Self {
        Self {
            dispatcher,
            defaults,
            shutdown,
        }
    }

    pub async fn run(&self, mut lines: mpsc::Receiver<String>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        println!(
            "Default target {}, devices {}",
            self.defaults.target_ip,
            self.defaults.devices.join(",")
        );

        while !self.shutdown.is_shutdown() {
            println!("{}", "-".repeat(50));

            prompt(&format!("Target IP (default {}): ", self.defaults.target_ip));
            let Some(target) = next_line(&mut lines, &mut shutdown_rx).await else {
                break;
            };
            prompt("Command: ");
            let Some(command) = next_line(&mut lines, &mut shutdown_rx).await else {
                break;
            };
            if command.trim().is_empty() {
                println!("{}", PromptError::EmptyCommand);
                continue;
            }
            prompt(&format!("Devices (default {}): ", self.defaults.devices.join(",")));
            let Some(devices) = next_line(&mut lines, &mut shutdown_rx).await else {
                break;
            };

            let request = match DispatchRequest::from_answers(&target, &command, &devices, &self.defaults) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Skipping dispatch");
                    println!("{}", e);
                    continue;
                }
            };

            match run_with_shutdown(request.send(&self.dispatcher), &mut shutdown_rx).await {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Dispatch failed");
                    println!("Dispatch failed: {}", e);
                }
                None => break,
            }
        }

        info!("Dispatch console stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn defaults() -> DispatchDefaults {
        DispatchDefaults {
            target_ip: "192.168.1.255".parse().unwrap(),
            devices: vec!["ESP32_A".to_string(), "ESP32_B".to_string()],
        }
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_blank_answers_use_defaults() {
        let request = DispatchRequest::from_answers("", " blink ", "  ", &defaults()).unwrap();
        assert_eq!(request.target_ip, defaults().target_ip);
        assert_eq!(request.command, "blink");
        assert_eq!(request.devices, defaults().devices);
    }

    #[test]
    fn test_answers_override_defaults() {
        let request =
            DispatchRequest::from_answers("10.0.0.255", "start", "ESP32_C, ESP32_D", &defaults())
                .unwrap();
        assert_eq!(request.target_ip, "10.0.0.255".parse::<IpAddr>().unwrap());
        assert_eq!(request.devices, vec!["ESP32_C", "ESP32_D"]);
    }

    #[test]
    fn test_invalid_answers() {
        assert_eq!(
            DispatchRequest::from_answers("", "", "", &defaults()),
            Err(PromptError::EmptyCommand)
        );
        assert_eq!(
            DispatchRequest::from_answers("broadcast", "blink", "", &defaults()),
            Err(PromptError::InvalidTarget("broadcast".to_string()))
        );

        let no_devices = DispatchDefaults {
            devices: Vec::new(),
            ..defaults()
        };
        assert_eq!(
            DispatchRequest::from_answers("", "blink", ",", &no_devices),
            Err(PromptError::NoDevices)
        );
    }

    #[tokio::test]
    async fn test_console_returns_once_shut_down() {
        let shutdown = ShutdownSignal::new();
        shutdown.shutdown();
        let console = DispatchConsole::new(BroadcastDispatcher::default(), defaults(), shutdown);

        let (_tx, lines) = mpsc::channel(1);
        tokio::time::timeout(std::time::Duration::from_secs(2), console.run(lines))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_console_returns_when_input_closes_mid_prompt() {
        let console =
            DispatchConsole::new(BroadcastDispatcher::default(), defaults(), ShutdownSignal::new());

        let (tx, lines) = mpsc::channel(4);
        tx.send(String::new()).await.unwrap();
        tx.send("blink".to_string()).await.unwrap();
        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(2), console.run(lines))
            .await
            .unwrap();
    }

    #[test]
    fn test_render_report() {
        let complete = DispatchReport {
            session: 1,
            received: set(&["ESP32_A", "ESP32_B"]),
            ..Default::default()
        };
        assert_eq!(
            render_report(&complete),
            "Acked: ESP32_A, ESP32_B\nAll acks received"
        );

        let partial = DispatchReport {
            session: 2,
            received: set(&["ESP32_A"]),
            missing: set(&["ESP32_B"]),
            unexpected: set(&["ESP32_Z"]),
        };
        assert_eq!(
            render_report(&partial),
            "Acked: ESP32_A\nMissing acks from: ESP32_B\nUnexpected acks from: ESP32_Z"
        );
    }
}
