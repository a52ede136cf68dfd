//! Core abstractions for real-time agent sessions.
//!
//! This crate provides the collaborator seams consumed by the session layer:
//! - `TransportAdapter` - Opaque real-time transport capability
//! - `MediaDevices`, `MediaTrack`, `MediaSink` - Local capture and playback
//! - `TransportEvent` - Typed inbound transport events
//! - `ClientConfig` / `ConnectParams` - Deployment configuration and handshake input

pub mod config;
pub mod events;
pub mod traits;

pub use config::{ClientConfig, ConnectParams};
pub use events::{EventSender, Participant, RemoteTrack, TransportErrorInfo, TransportEvent};
pub use traits::{MediaDevices, MediaSink, MediaTrack, TrackKind, TrackRef, TransportAdapter};
