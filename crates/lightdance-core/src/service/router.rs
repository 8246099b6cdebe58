// Operator command routing
// Parses console lines into node commands and delivers them through the registry

use std::{net::IpAddr, str::FromStr, time::Duration};

use lightdance_common::{PLAY_ACTION, day_micros};
use tracing::{error, info, warn};

use crate::{
    model::Frame,
    service::registry::{BroadcastOutcome, DeliveryError, NodeHandle, NodeRegistry},
};

/// Time nodes get to finish a sync handshake before `play` goes out
pub const SYNC_SETTLE_INTERVAL: Duration = Duration::from_millis(100);

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Operator input that produced no message
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("empty command")]
    Empty,

    #[error("Usage: play <seconds>")]
    PlayUsage,

    #[error("invalid seconds value '{0}'")]
    InvalidSeconds(String),

    #[error("invalid target address '{0}'")]
    InvalidTarget(String),

    #[error("unsupported command '{0}'")]
    Unsupported(String),
}

/// Playback controls forwarded to the node's player without parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackControl {
    Pause,
    Stop,
    Restart,
    Quit,
}

impl PlaybackControl {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackControl::Pause => "pause",
            PlaybackControl::Stop => "stop",
            PlaybackControl::Restart => "restart",
            PlaybackControl::Quit => "quit",
        }
    }
}

impl std::fmt::Display for PlaybackControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlaybackControl {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(PlaybackControl::Pause),
            "stop" => Ok(PlaybackControl::Stop),
            "restart" => Ok(PlaybackControl::Restart),
            "quit" => Ok(PlaybackControl::Quit),
            _ => Err(RouteError::Unsupported(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Start playback after `delay_micros`, preceded by a sync fan-out
    Play { delay_micros: u64 },
    Control(PlaybackControl),
    /// Console-only listing of connected nodes
    List,
    /// `ledtest` / `oftest` with their arguments passed through untouched
    Passthrough { name: String, args: Vec<String> },
}

impl Action {
    /// Parse the command part of a console line
    pub fn parse(text: &str) -> Result<Self, RouteError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some((&name, rest)) = tokens.split_first() else {
            return Err(RouteError::Empty);
        };

        match name {
            "play" => {
                let [seconds] = rest else {
                    return Err(RouteError::PlayUsage);
                };
                let delay_micros = seconds
                    .parse::<u64>()
                    .ok()
                    .and_then(|s| s.checked_mul(MICROS_PER_SECOND))
                    .ok_or_else(|| RouteError::InvalidSeconds(seconds.to_string()))?;
                Ok(Action::Play { delay_micros })
            }
            "pause" | "stop" | "restart" | "quit" => Ok(Action::Control(name.parse()?)),
            "list" => Ok(Action::List),
            "ledtest" | "oftest" => Ok(Action::Passthrough {
                name: name.to_string(),
                args: rest.iter().map(|s| s.to_string()).collect(),
            }),
            other => Err(RouteError::Unsupported(other.to_string())),
        }
    }

    /// Whether nodes must re-sync their clocks before this action is sent
    pub fn needs_sync(&self) -> bool {
        matches!(self, Action::Play { .. })
    }

    /// Command arguments sent to nodes, `None` for console-only actions
    fn args(&self) -> Option<Vec<String>> {
        match self {
            Action::Play { delay_micros } => Some(vec![
                PLAY_ACTION.to_string(),
                "play".to_string(),
                delay_micros.to_string(),
            ]),
            Action::Control(control) => Some(vec![PLAY_ACTION.to_string(), control.to_string()]),
            Action::List => None,
            Action::Passthrough { name, args } => {
                let mut command = Vec::with_capacity(args.len() + 1);
                command.push(name.clone());
                command.extend(args.iter().cloned());
                Some(command)
            }
        }
    }

    /// Frame carrying this action, stamped now when the action is time-sensitive
    pub fn to_frame(&self) -> Option<Frame> {
        self.args().map(|args| Frame::Command {
            args,
            send_time: self.needs_sync().then(day_micros),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    All,
    Node(IpAddr),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::All => write!(f, "all"),
            Target::Node(addr) => write!(f, "{}", addr),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedCommand {
    pub target: Target,
    pub action: Action,
}

/// Parse one console line, `[<target-address>:]<command>`.
///
/// The text before the first `:` is a target only when it contains no
/// whitespace, so passthrough arguments may still use colons.
///
/// ```
/// use lightdance_core::{Action, Target, route};
///
/// let routed = route("192.168.1.42: pause").unwrap();
/// assert_eq!(routed.target, Target::Node("192.168.1.42".parse().unwrap()));
///
/// let routed = route("play 10").unwrap();
/// assert_eq!(routed.target, Target::All);
/// assert_eq!(routed.action, Action::Play { delay_micros: 10_000_000 });
/// ```
pub fn route(line: &str) -> Result<RoutedCommand, RouteError> {
    let line = line.trim();

    let (target, command) = match line.split_once(':') {
        Some((prefix, rest))
            if !prefix.trim().is_empty() && !prefix.trim().contains(char::is_whitespace) =>
        {
            let prefix = prefix.trim();
            let addr = prefix
                .parse::<IpAddr>()
                .map_err(|_| RouteError::InvalidTarget(prefix.to_string()))?;
            (Target::Node(addr), rest)
        }
        _ => (Target::All, line),
    };

    Ok(RoutedCommand {
        target,
        action: Action::parse(command)?,
    })
}

/// What happened to a routed command
#[derive(Clone, Debug)]
pub enum RouteOutcome {
    /// `list`: registry snapshot for the console, nothing sent
    Listed(Vec<(IpAddr, NodeHandle)>),
    Delivered(IpAddr),
    /// Targeted delivery failed; no other node was touched
    Dropped { target: IpAddr, error: DeliveryError },
    Broadcast(BroadcastOutcome),
}

/// Drives node delivery for operator commands.
#[derive(Clone)]
pub struct CommandRouter {
    registry: NodeRegistry,
    settle_interval: Duration,
}

impl CommandRouter {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            settle_interval: SYNC_SETTLE_INTERVAL,
        }
    }

    pub fn with_settle_interval(mut self, settle_interval: Duration) -> Self {
        self.settle_interval = settle_interval;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Parse and execute one console line.
    ///
    /// Input errors are logged and returned; nothing is sent for them.
    pub async fn submit(&self, line: &str) -> Result<RouteOutcome, RouteError> {
        let command = route(line).inspect_err(|e| warn!(input = line, "{}", e))?;
        Ok(self.execute(command).await)
    }

    pub async fn execute(&self, command: RoutedCommand) -> RouteOutcome {
        let RoutedCommand { target, action } = command;

        if action == Action::List {
            return RouteOutcome::Listed(self.registry.snapshot());
        }

        // Unknown targets are rejected before any sync goes out
        if let Target::Node(addr) = target
            && !self.registry.contains(&addr)
        {
            let error = DeliveryError::NotConnected(addr);
            error!(node = %addr, "{}", error);
            return RouteOutcome::Dropped {
                target: addr,
                error,
            };
        }

        if action.needs_sync() {
            self.sync_all().await;
        }

        // Built after the sync settle so `send_time` is the actual send instant
        let Some(frame) = action.to_frame() else {
            return RouteOutcome::Listed(self.registry.snapshot());
        };

        match target {
            Target::Node(addr) => match self.registry.send_to(&addr, frame) {
                Ok(()) => {
                    info!(node = %addr, ?action, "Command sent");
                    RouteOutcome::Delivered(addr)
                }
                Err(error) => {
                    error!(node = %addr, error = %error, "Failed to send command");
                    RouteOutcome::Dropped {
                        target: addr,
                        error,
                    }
                }
            },
            Target::All => {
                let outcome = self.registry.broadcast(&frame);
                log_failures(&outcome, "command");
                info!(
                    delivered = outcome.delivered.len(),
                    failed = outcome.failed.len(),
                    ?action,
                    "Command broadcast"
                );
                RouteOutcome::Broadcast(outcome)
            }
        }
    }

    /// Ask every node to sync, then give the handshakes time to complete
    async fn sync_all(&self) {
        let outcome = self.registry.broadcast(&Frame::sync_request());
        log_failures(&outcome, "sync request");
        info!(
            nodes = outcome.delivered.len(),
            settle_ms = self.settle_interval.as_millis() as u64,
            "Sync requested before play"
        );
        tokio::time::sleep(self.settle_interval).await;
    }
}

fn log_failures(outcome: &BroadcastOutcome, what: &str) {
    for (addr, error) in &outcome.failed {
        error!(node = %addr, error = %error, "Failed to send {}", what);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn node(registry: &NodeRegistry, id: u64, addr: &str) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(8);
        let handle = NodeHandle::new(id, addr.parse().unwrap(), tx);
        registry.register(handle.remote_addr.ip(), handle);
        rx
    }

    fn ip(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    fn args(frame: &Frame) -> Vec<String> {
        match frame {
            Frame::Command { args, .. } => args.clone(),
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_play() {
        let action = Action::parse("play 10").unwrap();
        assert_eq!(action, Action::Play { delay_micros: 10_000_000 });
        assert!(action.needs_sync());
        assert_eq!(
            args(&action.to_frame().unwrap()),
            vec!["play-action", "play", "10000000"]
        );
    }

    #[test]
    fn test_parse_play_rejects_bad_arity_and_values() {
        assert_eq!(Action::parse("play"), Err(RouteError::PlayUsage));
        assert_eq!(Action::parse("play 1 2"), Err(RouteError::PlayUsage));
        assert_eq!(
            Action::parse("play abc"),
            Err(RouteError::InvalidSeconds("abc".to_string()))
        );
        assert_eq!(
            Action::parse("play -3"),
            Err(RouteError::InvalidSeconds("-3".to_string()))
        );
        assert_eq!(
            Action::parse("play 18446744073709551615"),
            Err(RouteError::InvalidSeconds("18446744073709551615".to_string()))
        );
    }

    #[test]
    fn test_parse_controls_and_passthrough() {
        for name in ["pause", "stop", "restart", "quit"] {
            let frame = Action::parse(name).unwrap().to_frame().unwrap();
            assert_eq!(args(&frame), vec!["play-action", name]);
        }

        let frame = Action::parse("ledtest 3 red").unwrap().to_frame().unwrap();
        assert_eq!(args(&frame), vec!["ledtest", "3", "red"]);

        let frame = Action::parse("oftest").unwrap().to_frame().unwrap();
        assert_eq!(args(&frame), vec!["oftest"]);
    }

    #[test]
    fn test_list_has_no_frame() {
        assert_eq!(Action::parse("list").unwrap().to_frame(), None);
    }

    #[test]
    fn test_unsupported_and_empty() {
        assert_eq!(
            Action::parse("dance"),
            Err(RouteError::Unsupported("dance".to_string()))
        );
        assert_eq!(Action::parse("   "), Err(RouteError::Empty));
    }

    #[test]
    fn test_route_targets() {
        let routed = route("10.0.0.5:play 3").unwrap();
        assert_eq!(routed.target, Target::Node(ip("10.0.0.5")));
        assert_eq!(routed.action, Action::Play { delay_micros: 3_000_000 });

        // Colon inside passthrough arguments is not a target
        let routed = route("ledtest color:red").unwrap();
        assert_eq!(routed.target, Target::All);

        assert_eq!(
            route("node-a:pause"),
            Err(RouteError::InvalidTarget("node-a".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_syncs_once_then_sends() {
        let registry = NodeRegistry::new();
        let mut a = node(&registry, 1, "10.0.0.1:4000");
        let mut b = node(&registry, 2, "10.0.0.2:4000");
        let router = CommandRouter::new(registry);

        let outcome = router.submit("play 10").await.unwrap();
        let RouteOutcome::Broadcast(outcome) = outcome else {
            panic!("expected broadcast");
        };
        assert_eq!(outcome.delivered.len(), 2);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_recv().unwrap(), Frame::sync_request());
            let frame = rx.try_recv().unwrap();
            assert_eq!(args(&frame), vec!["play-action", "play", "10000000"]);
            assert!(matches!(frame, Frame::Command { send_time: Some(_), .. }));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_waits_for_settle_interval() {
        let registry = NodeRegistry::new();
        let _a = node(&registry, 1, "10.0.0.1:4000");
        let router = CommandRouter::new(registry).with_settle_interval(Duration::from_millis(250));

        let start = tokio::time::Instant::now();
        router.submit("play 1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_rejected_play_sends_nothing() {
        let registry = NodeRegistry::new();
        let mut a = node(&registry, 1, "10.0.0.1:4000");
        let router = CommandRouter::new(registry.clone());

        assert_eq!(
            router.submit("play abc").await.unwrap_err(),
            RouteError::InvalidSeconds("abc".to_string())
        );
        assert_eq!(router.submit("play 1 2").await.unwrap_err(), RouteError::PlayUsage);
        assert!(a.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_targeted_delivery() {
        let registry = NodeRegistry::new();
        let mut a = node(&registry, 1, "10.0.0.1:4000");
        let mut b = node(&registry, 2, "10.0.0.2:4000");
        let router = CommandRouter::new(registry);

        let outcome = router.submit("10.0.0.2:pause").await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Delivered(addr) if addr == ip("10.0.0.2")));
        assert_eq!(args(&b.try_recv().unwrap()), vec!["play-action", "pause"]);
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_play_to_absent_node_touches_nobody() {
        let registry = NodeRegistry::new();
        let mut a = node(&registry, 1, "10.0.0.1:4000");
        let router = CommandRouter::new(registry.clone());

        let outcome = router.submit("10.0.0.9:play 5").await.unwrap();
        match outcome {
            RouteOutcome::Dropped { target, error } => {
                assert_eq!(target, ip("10.0.0.9"));
                assert_eq!(error, DeliveryError::NotConnected(ip("10.0.0.9")));
            }
            other => panic!("expected dropped, got {:?}", other),
        }
        assert!(a.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_sends_the_action_frame() {
        let registry = NodeRegistry::new();
        let mut rx = node(&registry, 1, "10.0.0.1:40000");
        let router = CommandRouter::new(registry);

        let action = Action::parse("oftest 2 blue").unwrap();
        router
            .execute(RoutedCommand {
                target: Target::All,
                action: action.clone(),
            })
            .await;

        assert_eq!(Some(rx.try_recv().unwrap()), action.to_frame());
    }

    #[tokio::test]
    async fn test_list_sends_nothing() {
        let registry = NodeRegistry::new();
        let mut a = node(&registry, 1, "10.0.0.1:4000");
        let router = CommandRouter::new(registry);

        let RouteOutcome::Listed(nodes) = router.submit("list").await.unwrap() else {
            panic!("expected listing");
        };
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].0, ip("10.0.0.1"));
        assert!(a.try_recv().is_err());
    }
}
