//! Session lifecycle controller and media-track manager.
//!
//! Provides:
//! - `SessionController` - Connect/disconnect state machine over a transport
//! - `MediaTrackManager` - Local capture and remote-track-to-sink binding
//! - `StatsMonitor` - Periodic connection statistics sampling
//! - `DiagnosticLog` - Append-only log for presentation

pub mod controller;
pub mod error;
pub mod log;
pub mod media;
pub mod state;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{MediaSinks, SessionController};
pub use error::SessionError;
pub use log::{DiagnosticLog, LogCategory, LogEntry};
pub use media::{DeviceState, MediaTrackManager, RemoteParticipantTrack};
pub use state::SessionState;
pub use stats::{StatsMonitor, StatsSample};
