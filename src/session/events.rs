//! Session state and notifications delivered to the host

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::protocol::{ToolInvocation, ToolResult};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    /// Transport opening or setup not yet acknowledged
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The host asked for it (or dropped every handle)
    Requested,
    ClosedByPeer { code: u16, reason: String },
    ConnectFailed { message: String },
    /// Read or write failure on an open transport
    Transport { message: String },
}

impl DisconnectReason {
    /// Whether the session ended without the host asking
    pub fn is_error(&self) -> bool {
        !matches!(self, DisconnectReason::Requested)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "Disconnected"),
            DisconnectReason::ClosedByPeer { code, reason } if reason.is_empty() => {
                write!(f, "Connection closed by server (code {})", code)
            }
            DisconnectReason::ClosedByPeer { code, reason } => {
                write!(f, "Connection closed by server (code {}): {}", code, reason)
            }
            DisconnectReason::ConnectFailed { message } => {
                write!(f, "Could not connect: {}", message)
            }
            DisconnectReason::Transport { message } => write!(f, "Connection lost: {}", message),
        }
    }
}

/// Local capture or output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Microphone,
    Camera,
    Speaker,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Microphone => write!(f, "microphone"),
            DeviceKind::Camera => write!(f, "camera"),
            DeviceKind::Speaker => write!(f, "speaker"),
        }
    }
}

/// Something the host should know about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: SessionState },
    SetupComplete,
    /// Text part of a model turn
    Text { text: String },
    ToolCall { invocations: Vec<ToolInvocation> },
    ToolResponseSent { results: Vec<ToolResult> },
    /// Playback was cancelled by the peer
    Interrupted,
    TurnComplete,
    CaptureChanged { device: DeviceKind, active: bool },
    DeviceError { device: DeviceKind, message: String },
    /// A single inbound frame was dropped
    ProtocolError { message: String },
    /// Always the last event of a session
    Disconnected { reason: DisconnectReason },
}

/// An event stamped with its session and time
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: SessionEvent,
}

impl Notification {
    pub fn new(session_id: Uuid, event: SessionEvent) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            event,
        }
    }
}
