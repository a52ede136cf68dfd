//! Session error kinds.
//!
//! None of these are returned from `connect`/`disconnect`; they are absorbed
//! by the controller and surface as state changes and log entries.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Camera acquisition failed: {0}")]
    CameraAcquisition(String),
    #[error("Device initialization failed: {0}")]
    DeviceInit(String),
    #[error("Transport connect failed: {0}")]
    TransportConnect(String),
    #[error("Transport runtime error: {0}")]
    TransportRuntime(String),
    #[error("Cleanup error: {0}")]
    Cleanup(String),
}

impl SessionError {
    /// The message without the error-kind prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::CameraAcquisition(detail)
            | Self::DeviceInit(detail)
            | Self::TransportConnect(detail)
            | Self::TransportRuntime(detail)
            | Self::Cleanup(detail) => detail,
        }
    }
}
