use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transport::PinDirection;

/// Phase of a pairing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingPhase {
    /// No session
    Idle,
    /// Waiting for the device to open the exchange
    Started,
    /// Waiting for the user's PIN
    AwaitingPin,
    /// PIN sent to the device
    Verifying,
    /// Credentials obtained
    Paired,
    /// Attempts exhausted, expired or device error
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl PairingPhase {
    /// Check if the session still holds the device
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::AwaitingPin | Self::Verifying)
    }
}

/// One PIN exchange with a device
#[derive(Debug, Clone, Serialize)]
pub struct PairingSession {
    /// Device being paired
    pub device_id: String,
    /// Who shows the PIN; known once the device answered
    pub direction: Option<PinDirection>,
    /// PIN the user must enter on the device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_pin: Option<String>,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Session expiry
    pub expires_at: DateTime<Utc>,
    /// Rejected PIN submissions
    pub attempts: u32,
}

/// Read-only view of a device's session
#[derive(Debug, Clone, Serialize)]
pub struct PairingStatus {
    /// Current phase
    pub phase: PairingPhase,
    /// Session details
    #[serde(flatten)]
    pub session: PairingSession,
}
