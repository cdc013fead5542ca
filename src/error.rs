use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Coarse classification used to route failures
///
/// Fan-out and the engine branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected immediately and never retried
    Validation,
    /// Device demands pairing before it accepts content
    Authorization,
    /// Timeout or connection reset, retried with bounded backoff
    TransientNetwork,
    /// Device cannot handle the requested delivery mode
    Capability,
    /// Content could not be prepared
    Resource,
    /// Operation collides with one already in progress
    Conflict,
    /// Unknown device or session
    NotFound,
    /// Operation not valid in the current state
    State,
    /// Storage, engine or other internal failure
    Internal,
}

/// Errors produced by the slideshow engine
#[derive(Debug, Error)]
pub enum SlideshowError {
    // ===== Input Errors =====
    /// Input failed validation
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the failure
        message: String,
    },

    // ===== Device Errors =====
    /// Device rejected the request until it is paired
    #[error("device {device_id} requires pairing: {message}")]
    AuthorizationRequired {
        /// The device demanding pairing
        device_id: String,
        /// Detail reported by the device
        message: String,
    },

    /// Connection refused, reset or otherwise broken
    #[error("network error with {device_id}: {message}")]
    Network {
        /// The device involved
        device_id: String,
        /// Description of the failure
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Device did not answer in time
    #[error("device {device_id} timed out after {duration:?}")]
    Timeout {
        /// The device involved
        device_id: String,
        /// How long we waited
        duration: Duration,
    },

    /// Device does not support the requested feature
    #[error("device {device_id} does not support {capability}")]
    Capability {
        /// The device involved
        device_id: String,
        /// Missing capability
        capability: String,
    },

    /// Device is not known to the registry
    #[error("device not found: {device_id}")]
    DeviceNotFound {
        /// The ID that was looked up
        device_id: String,
    },

    /// Pairing exchange ended without credentials
    #[error("pairing failed for {device_id}: {message}")]
    PairingFailed {
        /// The device being paired
        device_id: String,
        /// Description of the failure
        message: String,
    },

    // ===== Content Errors =====
    /// Content could not be read, decoded or encoded
    #[error("content error for {}: {message}", .path.display())]
    Resource {
        /// The content item
        path: PathBuf,
        /// Description of the failure
        message: String,
    },

    // ===== State Errors =====
    /// Another operation already owns the resource
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Operation not valid in the current state
    #[error("invalid state: {message} (current: {current_state})")]
    InvalidState {
        /// Why the operation was refused
        message: String,
        /// The state that refused it
        current_state: String,
    },

    // ===== Internal Errors =====
    /// Persistence layer failed
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Synchronous bridge gave up waiting; the operation keeps running
    #[error("bridge call timed out after {0:?}")]
    BridgeTimeout(Duration),

    /// The engine task is gone
    #[error("engine is not running")]
    EngineClosed,

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SlideshowError {
    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a state error
    pub fn invalid_state(message: impl Into<String>, current_state: impl std::fmt::Debug) -> Self {
        Self::InvalidState {
            message: message.into(),
            current_state: format!("{current_state:?}"),
        }
    }

    /// Shorthand for a network error without a source
    pub fn network(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            device_id: device_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AuthorizationRequired { .. } => ErrorKind::Authorization,
            Self::Network { .. } | Self::Timeout { .. } => ErrorKind::TransientNetwork,
            Self::Capability { .. } => ErrorKind::Capability,
            Self::Resource { .. } => ErrorKind::Resource,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::DeviceNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } | Self::PairingFailed { .. } => ErrorKind::State,
            Self::Storage(_) | Self::BridgeTimeout(_) | Self::EngineClosed | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this error is worth retrying
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }

    /// Check if this error should start the pairing flow
    #[must_use]
    pub fn requires_pairing(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }

    /// Device the error is about, if any
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::AuthorizationRequired { device_id, .. }
            | Self::Network { device_id, .. }
            | Self::Timeout { device_id, .. }
            | Self::Capability { device_id, .. }
            | Self::DeviceNotFound { device_id }
            | Self::PairingFailed { device_id, .. } => Some(device_id),
            _ => None,
        }
    }
}

/// Result type alias for slideshow operations
pub type Result<T> = std::result::Result<T, SlideshowError>;
