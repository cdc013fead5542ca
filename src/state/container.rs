//! Published status snapshots

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::watch;

use crate::slideshow::SessionState;
use crate::types::{SlideshowConfig, SlideshowStats};

/// Full engine state for reconnecting UIs
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    /// Session state
    pub state: SessionState,
    /// Whether the slideshow is running
    pub is_running: bool,
    /// Configured images directory
    pub images_directory: Option<PathBuf>,
    /// Images in the configured set
    pub images_count: usize,
    /// Selected devices currently receiving content
    pub active_devices: Vec<String>,
    /// Every connected device
    pub connected_devices: Vec<String>,
    /// Seconds per step
    pub display_time: Option<u64>,
    /// Video mode flag
    pub video_mode: bool,
    /// Crossfade seconds in video mode
    pub transition_duration: Option<f64>,
    /// Current step index
    pub current_step: u64,
    /// Running totals
    pub stats: SlideshowStats,
    /// Configuration echo
    pub config: Option<SlideshowConfig>,
}

/// Latest snapshot with change notifications
pub struct StatusContainer {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusContainer {
    /// Create a container holding the default snapshot
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    /// Current snapshot
    #[must_use]
    pub fn get(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Replace the snapshot
    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.tx.send_replace(snapshot);
    }
}

impl Default for StatusContainer {
    fn default() -> Self {
        Self::new()
    }
}
