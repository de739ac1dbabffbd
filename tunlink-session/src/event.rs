//! Session states and events

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tunnel session
///
/// Every transition is driven by the controller worker; observers only ever
/// read the state. All paths, including every failure path, converge back to
/// [`Disconnected`](SessionState::Disconnected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session; nothing held
    Disconnected,
    /// Waiting for the user or platform to grant the tunnel permission
    AwaitingPermission,
    /// Asking the platform to create the tunnel device
    EstablishingDevice,
    /// Device requested; waiting for its descriptor to become ready
    WaitingForDescriptor,
    /// Descriptor in hand; bringing up the packet-processing engine
    ActivatingEngine,
    /// Engine owns the descriptor and is forwarding traffic
    Connected,
    /// Tearing the session down
    Disconnecting,
    /// A step faulted; transient, resolves to Disconnected
    Failed,
}

impl SessionState {
    /// Whether a connect attempt is in progress or complete
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    /// Whether the engine is forwarding traffic
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Coarse status label used by user interfaces
    ///
    /// The vocabulary is fixed: `disconnected`, `connecting`, `connected`,
    /// `disconnecting`. Intermediate connect states all map to `connecting`.
    pub fn status_label(&self) -> &'static str {
        match self {
            SessionState::Disconnected | SessionState::Failed => "disconnected",
            SessionState::AwaitingPermission
            | SessionState::EstablishingDevice
            | SessionState::WaitingForDescriptor
            | SessionState::ActivatingEngine => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "no active session",
            SessionState::AwaitingPermission => "waiting for tunnel permission",
            SessionState::EstablishingDevice => "establishing tunnel device",
            SessionState::WaitingForDescriptor => "waiting for device descriptor",
            SessionState::ActivatingEngine => "activating engine",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Failed => "session failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Events emitted by the session controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// Traffic statistics snapshot, JSON-encoded by the engine
    Stats(String),
    /// Log line for the session log
    Log(String),
}

impl SessionEvent {
    /// Serialize into the wire form consumed by user-interface shells
    pub fn to_ui_message(&self) -> UiMessage {
        match self {
            SessionEvent::StateChanged { to, .. } => UiMessage {
                kind: "status".into(),
                data: to.status_label().into(),
            },
            SessionEvent::Stats(stats) => UiMessage {
                kind: "stats".into(),
                data: stats.clone(),
            },
            SessionEvent::Log(line) => UiMessage {
                kind: "log".into(),
                data: line.clone(),
            },
        }
    }
}

/// Message shape sent to user-interface shells
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMessage {
    /// Message kind: `status`, `stats` or `log`
    #[serde(rename = "type")]
    pub kind: String,
    /// Message payload
    pub data: String,
}

/// Receives session events
///
/// Handlers run inside the controller worker and should return quickly.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a session event
    async fn on_event(&self, event: SessionEvent);
}

/// Event handler that writes events to the log
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged { from, to } => {
                log::info!("session state: {:?} -> {:?}", from, to);
            }
            SessionEvent::Stats(stats) => {
                log::trace!("session stats: {}", stats);
            }
            SessionEvent::Log(line) => {
                log::info!("{}", line);
            }
        }
    }
}
