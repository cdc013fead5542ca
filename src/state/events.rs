//! Event bus for slideshow events

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ErrorKind, SlideshowError};
use crate::registry::DeviceState;
use crate::transport::PinDirection;
use crate::types::{SlideshowConfig, SlideshowStats};

/// Outbound status events
///
/// Serialized with a snake_case `type` tag for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlideshowEvent {
    // Session events
    /// Slideshow entered `Running`
    SlideshowStarted {
        /// Active configuration
        config: SlideshowConfig,
        /// Devices receiving content
        active_devices: Vec<String>,
        /// When it started
        timestamp: DateTime<Utc>,
    },
    /// Slideshow entered `Stopped`
    SlideshowStopped {
        /// Totals of the run
        stats: SlideshowStats,
        /// When it stopped
        timestamp: DateTime<Utc>,
    },
    /// One step was delivered
    ImagesDisplayed {
        /// Step index
        step: u64,
        /// Per-device assignment and outcome
        distribution: Vec<DisplayedImage>,
        /// Running totals
        stats: SlideshowStats,
        /// When the step finished
        timestamp: DateTime<Utc>,
    },
    /// A full pass through the image set finished
    CycleCompleted {
        /// Cycles completed in this run
        cycles: u64,
        /// When it completed
        timestamp: DateTime<Utc>,
    },
    /// Configuration replaced
    ConfigurationUpdated {
        /// New configuration
        config: SlideshowConfig,
        /// Images found in the directory
        images_count: usize,
    },
    /// Display time changed
    DisplayTimeUpdated {
        /// New display time in seconds
        display_time: u64,
    },

    // Device events
    /// Device must be paired before it accepts content
    AuthenticationRequired {
        /// The device
        device_id: String,
        /// Its display name
        name: String,
    },
    /// A pairing session opened
    PairingStarted {
        /// The device
        device_id: String,
        /// Who shows the PIN
        direction: PinDirection,
        /// PIN to enter on the device, when the controller provides it
        #[serde(skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },
    /// Registry state transition
    DeviceStateChanged {
        /// The device
        device_id: String,
        /// Previous state
        old: DeviceState,
        /// New state
        new: DeviceState,
    },

    // Content events
    /// Video-mode preparation progress
    StreamingProgress {
        /// Device the clip is for
        device_id: String,
        /// Progress stage
        stage: StreamingStage,
    },

    // Error events
    /// User-visible failure
    Error {
        /// Device concerned, if any
        device_id: Option<String>,
        /// Failure class
        kind: ErrorKind,
        /// Error message
        message: String,
        /// When it happened
        timestamp: DateTime<Utc>,
    },
}

impl SlideshowEvent {
    /// Error event from an error value
    #[must_use]
    pub fn error(device_id: Option<&str>, error: &SlideshowError) -> Self {
        Self::Error {
            device_id: device_id
                .or_else(|| error.device_id())
                .map(ToString::to_string),
            kind: error.kind(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Device the event concerns, if any
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::AuthenticationRequired { device_id, .. }
            | Self::PairingStarted { device_id, .. }
            | Self::DeviceStateChanged { device_id, .. }
            | Self::StreamingProgress { device_id, .. } => Some(device_id),
            Self::Error { device_id, .. } => device_id.as_deref(),
            _ => None,
        }
    }
}

/// Assignment of one device in one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayedImage {
    /// Target device
    pub device_id: String,
    /// Image file name
    pub image: String,
    /// Whether the device accepted it
    pub delivered: bool,
    /// Failure message when not delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stage of a video-mode clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamingStage {
    /// Preparation began
    Starting {
        /// Target image file name
        image: String,
    },
    /// Frame `current` of `total` rendered
    Creating {
        /// Frames done
        current: u32,
        /// Frames in the clip
        total: u32,
    },
    /// Clip ready
    Completed,
    /// Preparation failed
    Error {
        /// Error message
        message: String,
    },
}

/// Event bus for distributing events
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast sender
    tx: broadcast::Sender<SlideshowEvent>,
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SlideshowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: SlideshowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    /// Get subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    rx: broadcast::Receiver<SlideshowEvent>,
    filter: Box<dyn Fn(&SlideshowEvent) -> bool + Send>,
}

impl EventFilter {
    /// Create a filtered event receiver
    pub fn new<F>(rx: broadcast::Receiver<SlideshowEvent>, filter: F) -> Self
    where
        F: Fn(&SlideshowEvent) -> bool + Send + 'static,
    {
        Self {
            rx,
            filter: Box::new(filter),
        }
    }

    /// Receive next matching event
    ///
    /// Lagged receivers skip what they missed.
    pub async fn recv(&mut self) -> Option<SlideshowEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events about one device
    #[must_use]
    pub fn device(rx: broadcast::Receiver<SlideshowEvent>, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        Self::new(rx, move |e| e.device_id() == Some(device_id.as_str()))
    }

    /// Error events only
    #[must_use]
    pub fn errors(rx: broadcast::Receiver<SlideshowEvent>) -> Self {
        Self::new(rx, |e| matches!(e, SlideshowEvent::Error { .. }))
    }
}
