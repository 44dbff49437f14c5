use std::fmt;

use progress_core::{Classified, InboundMessage};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The server announced a newer connection for this identity.
    Superseded,
    ClosedByServer,
    Transport(String),
}

impl DisconnectReason {
    /// Whether the driver will try to reconnect after this closure.
    pub fn allows_reconnect(&self) -> bool {
        matches!(
            self,
            DisconnectReason::ClosedByServer | DisconnectReason::Transport(_)
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::Superseded => write!(f, "superseded by a newer connection"),
            DisconnectReason::ClosedByServer => write!(f, "closed by server"),
            DisconnectReason::Transport(message) => write!(f, "transport error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("no async runtime available to drive the connection")]
    NoRuntime,
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl ConnectionError {
    /// Terminal errors end the driver; everything else is recovered locally.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionError::ReconnectExhausted { .. } | ConnectionError::NoRuntime
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Message(InboundMessage),
    Disconnected { reason: DisconnectReason },
    Error(ConnectionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEventKind {
    Connected,
    Message,
    Disconnected,
    Error,
}

impl ConnectionEventKind {
    pub const ALL: [ConnectionEventKind; 4] = [
        ConnectionEventKind::Connected,
        ConnectionEventKind::Message,
        ConnectionEventKind::Disconnected,
        ConnectionEventKind::Error,
    ];
}

impl Classified for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Connected => ConnectionEventKind::Connected,
            ConnectionEvent::Message(_) => ConnectionEventKind::Message,
            ConnectionEvent::Disconnected { .. } => ConnectionEventKind::Disconnected,
            ConnectionEvent::Error(_) => ConnectionEventKind::Error,
        }
    }
}
