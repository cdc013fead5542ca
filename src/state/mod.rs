//! Status snapshots and events

mod container;
mod events;

pub use container::{StatusContainer, StatusSnapshot};
pub use events::{DisplayedImage, EventBus, EventFilter, SlideshowEvent, StreamingStage};
