//! Core types module

mod config;
mod device;
mod slideshow;

#[cfg(test)]
mod tests;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use device::{Credentials, DeviceCapabilities, DeviceInfo, PairingRequirement};
pub use slideshow::{MAX_DISPLAY_TIME, SlideshowConfig, SlideshowStats};
