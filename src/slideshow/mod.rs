//! Slideshow session: configuration, image set, timing and statistics

mod images;
mod session;


use serde::{Deserialize, Serialize};

pub use images::{is_supported, load_images};
pub use session::{
    Assignment, ClipTiming, Finished, SlideshowSession, StepPlan, StepTally, validate_config,
};

/// Session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No timer, position kept
    #[default]
    Stopped,
    /// Timer armed or a step in flight
    Running,
}
