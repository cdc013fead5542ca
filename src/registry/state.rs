//! Device connection state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DeviceInfo;

/// Connection state of a known device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Seen on the network, never connected
    Discovered,
    /// Connection attempt in progress
    Connecting,
    /// Live link established
    Connected,
    /// Device demands pairing before it accepts content
    PairingRequired,
    /// PIN exchange in progress
    Pairing,
    /// Last connection or pairing attempt failed
    Failed,
    /// Link released or lost
    Disconnected,
}

impl DeviceState {
    /// Check if a transition is part of the connection state machine
    ///
    /// Moving to `Disconnected` is always allowed.
    #[must_use]
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        use DeviceState::{
            Connected, Connecting, Disconnected, Discovered, Failed, Pairing, PairingRequired,
        };

        if next == Disconnected {
            return true;
        }

        matches!(
            (self, next),
            (Discovered | Disconnected | Failed | PairingRequired, Connecting | Pairing)
                | (Connecting, Connected | PairingRequired | Failed)
                | (Pairing, Connected | Failed | PairingRequired)
                | (Connected, PairingRequired)
                | (Disconnected, Discovered)
        )
    }

    /// Check if the device has a live link
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == DeviceState::Connected
    }

    /// Check if an attempt is in progress
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, DeviceState::Connecting | DeviceState::Pairing)
    }
}

/// Registry record of one device
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    /// Identity and capabilities
    #[serde(flatten)]
    pub info: DeviceInfo,
    /// Connection state
    pub state: DeviceState,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Consecutive failed attempts
    pub retry_count: u32,
    /// Last time discovery saw the device
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// New record in the `Discovered` state
    #[must_use]
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            state: DeviceState::Discovered,
            last_error: None,
            retry_count: 0,
            last_seen: None,
        }
    }

    /// Device identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.id
    }
}

/// A recorded state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Device that moved
    pub device_id: String,
    /// Previous state
    pub old: DeviceState,
    /// New state
    pub new: DeviceState,
}
