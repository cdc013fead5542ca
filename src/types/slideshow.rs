use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted display time in seconds (one day)
pub const MAX_DISPLAY_TIME: u64 = 86_400;

/// What a slideshow shows, where, and how fast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideshowConfig {
    /// Directory the image set is loaded from
    pub images_directory: PathBuf,

    /// Selected devices; order decides the round-robin slot of each device
    pub devices: Vec<String>,

    /// Seconds each step stays on screen
    pub display_time: u64,

    /// Push transition clips instead of still images
    #[serde(default)]
    pub video_mode: bool,

    /// Seconds of crossfade at the start of each clip (video mode only)
    #[serde(default = "default_transition")]
    pub transition_duration: f64,
}

fn default_transition() -> f64 {
    1.0
}

impl SlideshowConfig {
    /// Create an image-mode configuration
    #[must_use]
    pub fn new(images_directory: impl Into<PathBuf>, devices: Vec<String>, display_time: u64) -> Self {
        Self {
            images_directory: images_directory.into(),
            devices,
            display_time,
            video_mode: false,
            transition_duration: default_transition(),
        }
    }

    /// Switch to video mode with the given crossfade length
    #[must_use]
    pub fn with_video(mut self, transition_duration: f64) -> Self {
        self.video_mode = true;
        self.transition_duration = transition_duration;
        self
    }

    /// Display time as a `Duration`
    #[must_use]
    pub fn display_duration(&self) -> Duration {
        Duration::from_secs(self.display_time)
    }

    /// Transition length as a `Duration`, clamped to the display time
    #[must_use]
    pub fn transition(&self) -> Duration {
        let display = self.display_duration();
        Duration::try_from_secs_f64(self.transition_duration.max(0.0))
            .map_or(display, |transition| transition.min(display))
    }
}

/// Running totals for one slideshow run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideshowStats {
    /// When the current run started
    pub started_at: Option<DateTime<Utc>>,
    /// Successful per-device displays
    pub images_displayed: u64,
    /// Full passes through the image set
    pub cycles_completed: u64,
    /// Failed per-device displays
    pub errors: u64,
}
