//! Session lifecycle states and the allowed transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    EnablingCamera,
    InitializingDevices,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl SessionState {
    /// Whether a fresh `connect()` is accepted from this state.
    #[must_use]
    pub const fn accepts_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    /// Whether a connect sequence is suspended in one of its steps.
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::EnablingCamera | Self::InitializingDevices | Self::Connecting
        )
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Connect steps may move to `Disconnecting` when a disconnect was
    /// requested while the step was in flight.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Connected, Connecting, Disconnecting, EnablingCamera, Failed, Idle,
            InitializingDevices,
        };
        matches!(
            (self, next),
            (Idle | Failed, EnablingCamera)
                | (EnablingCamera, InitializingDevices)
                | (InitializingDevices, Connecting)
                | (Connecting, Connected)
                | (EnablingCamera | InitializingDevices | Connecting, Failed | Disconnecting)
                | (Connected, Disconnecting)
                | (Disconnecting | Failed, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::EnablingCamera => "enabling camera",
            Self::InitializingDevices => "initializing devices",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
