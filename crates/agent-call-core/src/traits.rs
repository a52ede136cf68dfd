//! Collaborator traits for transport, capture devices and playback sinks.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{ConnectParams, EventSender, RemoteTrack};

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// A single audio or video stream, local (captured) or remote (received).
pub trait MediaTrack: fmt::Debug + Send + Sync {
    /// Stable track identifier.
    fn id(&self) -> &str;

    /// Media kind.
    fn kind(&self) -> TrackKind;

    /// Whether the track is still producing media.
    fn is_live(&self) -> bool;

    /// Stop the track. Stopping an ended track is a no-op.
    fn stop(&self);
}

/// Shared reference to a track.
pub type TrackRef = Arc<dyn MediaTrack>;

/// Playback destination a track can be attached to.
///
/// A sink plays at most one track; attaching replaces the current source.
pub trait MediaSink: Send + Sync {
    /// Attach a track as the sink's source.
    fn attach(&self, track: TrackRef);

    /// Detach the current source, if any.
    fn detach(&self);
}

/// Local capture device error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Device busy: {0}")]
    Busy(String),
    #[error("No device found: {0}")]
    NotFound(String),
    #[error("Device error: {0}")]
    Other(String),
}

/// Local camera and microphone acquisition.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the local camera.
    async fn acquire_camera(&self) -> Result<TrackRef, DeviceError>;

    /// Acquire the local microphone.
    async fn acquire_microphone(&self) -> Result<TrackRef, DeviceError>;
}

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Device initialization failed: {0}")]
    Devices(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Transport not connected")]
    NotConnected,
    #[error("Transport error: {0}")]
    Internal(String),
}

/// Opaque real-time transport capability.
///
/// Implementations wrap the actual WebRTC stack. Everything after the
/// connect call begins is reported back through the supplied `EventSender`.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Initialize the transport's audio/video devices.
    async fn initialize_devices(&self) -> Result<(), TransportError>;

    /// Run the connect handshake and open the connection.
    async fn connect(&self, params: &ConnectParams, events: EventSender) -> Result<(), TransportError>;

    /// Close the connection. May be called on a broken or unopened transport.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Query statistics for the active connection.
    async fn stats(&self) -> Result<Value, TransportError>;

    /// Remote tracks currently known to the transport.
    fn remote_tracks(&self) -> Vec<RemoteTrack>;
}
