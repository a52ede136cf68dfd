//! Typed events delivered from the transport to the session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{TrackKind, TrackRef};

/// Transport state reported once media can flow.
pub const TRANSPORT_STATE_READY: &str = "ready";

/// A participant in the call (the bot, usually).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub local: bool,
}

impl Participant {
    #[must_use]
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            local: false,
        }
    }
}

/// Error payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportErrorInfo {
    pub message: String,
    /// Whether the error ends the connection.
    #[serde(default)]
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TransportErrorInfo {
    /// A recoverable, informational error.
    #[must_use]
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
            data: None,
        }
    }

    /// A connection-ending error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
            data: None,
        }
    }
}

/// A remote participant's track as announced by the transport.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub participant_id: String,
    pub track: TrackRef,
}

impl RemoteTrack {
    #[must_use]
    pub fn new(participant_id: impl Into<String>, track: TrackRef) -> Self {
        Self {
            participant_id: participant_id.into(),
            track,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.track.kind()
    }
}

/// Event from the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established.
    Connected,
    /// Connection closed.
    Disconnected,
    /// Transport state changed (`"ready"` once media can flow).
    TransportStateChanged { state: String },
    BotConnected { participant: Participant },
    BotDisconnected { participant: Participant },
    /// The bot finished its own setup.
    BotReady { data: Value },
    UserTranscript { text: String, is_final: bool },
    BotTranscript { text: String },
    /// A message exchanged with the bot could not be handled.
    MessageError { error: Value },
    Error { error: TransportErrorInfo },
    /// A remote track started.
    TrackStarted(RemoteTrack),
    /// A remote track ended.
    TrackStopped { participant_id: String, kind: TrackKind },
}

impl TransportEvent {
    /// Short event name for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::TransportStateChanged { .. } => "transport_state_changed",
            Self::BotConnected { .. } => "bot_connected",
            Self::BotDisconnected { .. } => "bot_disconnected",
            Self::BotReady { .. } => "bot_ready",
            Self::UserTranscript { .. } => "user_transcript",
            Self::BotTranscript { .. } => "bot_transcript",
            Self::MessageError { .. } => "message_error",
            Self::Error { .. } => "error",
            Self::TrackStarted(_) => "track_started",
            Self::TrackStopped { .. } => "track_stopped",
        }
    }
}

/// Sending half of a session's event channel, handed to the transport.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSender {
    /// Create a sender and its receiving half.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver an event. Returns false once the session has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::debug!(event = name, "Dropping transport event, session closed");
            return false;
        }
        true
    }

    /// Whether the session side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_defaults_to_recoverable() {
        let info: TransportErrorInfo =
            serde_json::from_str(r#"{"message":"ice restart"}"#).unwrap();
        assert!(!info.fatal);
        assert!(info.data.is_none());
    }

    #[test]
    fn test_participant_serialization() {
        let json = serde_json::to_string(&Participant::remote("bot-1")).unwrap();
        assert_eq!(json, r#"{"id":"bot-1","local":false}"#);
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (sender, mut rx) = EventSender::channel();
        assert!(sender.emit(TransportEvent::Connected));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Connected)));

        drop(rx);
        assert!(sender.is_closed());
        assert!(!sender.emit(TransportEvent::Disconnected));
    }
}
