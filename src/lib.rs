//! # airplay-slideshow
//!
//! Synchronized round-robin image slideshows across many `AirPlay` displays.
//!
//! ## Features
//!
//! - Device discovery via mDNS
//! - Connection state tracking with bounded automatic reconnects
//! - PIN pairing in both directions, with persisted credentials
//! - Concurrent, fault-isolated delivery of stills or crossfade clips
//! - Deterministic round-robin image distribution
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use airplay_slideshow::{EngineConfig, EngineHandle, HttpTransport, MemoryStore, SlideshowConfig};
//!
//! # async fn example() -> Result<(), airplay_slideshow::SlideshowError> {
//! let engine = EngineHandle::spawn(
//!     EngineConfig::default(),
//!     Arc::new(HttpTransport::new(Duration::from_secs(5))?),
//!     Arc::new(MemoryStore::new()),
//! )
//! .await?;
//!
//! let devices = engine.discover().await?;
//! let ids: Vec<String> = devices.iter().map(|d| d.info.id.clone()).collect();
//! for id in &ids {
//!     engine.connect(id.as_str()).await?;
//! }
//!
//! engine
//!     .configure(SlideshowConfig::new("/photos", ids, 10))
//!     .await?;
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Control**: [`EngineHandle`] (async) and [`Bridge`] (blocking) talk to
//!   one engine task that owns all mutable state
//! - **State machines**: [`registry`], [`pairing`] and [`slideshow`] hold
//!   pure state and decide what to do; the engine carries it out
//! - **Delivery**: [`streaming`] prepares content, serves it over HTTP and
//!   pushes URLs to devices through a [`transport`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Events and status snapshots
pub mod state;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

pub mod discovery;
pub mod engine;
pub mod pairing;
pub mod registry;
pub mod scheduler;
pub mod slideshow;
pub mod store;
pub mod streaming;
pub mod transport;

// Re-exports
pub use discovery::{DeviceBrowser, scan};
pub use engine::{Bridge, EngineHandle, PairingStart};
pub use error::{ErrorKind, Result, SlideshowError};
pub use pairing::{PairingPhase, PairingStatus};
pub use registry::{Device, DeviceState};
pub use scheduler::DistributionScheduler;
pub use slideshow::SessionState;
pub use state::{DisplayedImage, EventFilter, SlideshowEvent, StatusSnapshot, StreamingStage};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
#[cfg(feature = "http-transport")]
pub use transport::HttpTransport;
pub use transport::{DeviceLink, DeviceTransport, MediaKind, PairingHandle, PinDirection};
pub use types::{
    Credentials, DeviceCapabilities, DeviceInfo, EngineConfig, PairingRequirement, SlideshowConfig,
    SlideshowStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        Bridge, Device, DeviceState, EngineConfig, EngineHandle, MemoryStore, PinDirection,
        SessionState, SlideshowConfig, SlideshowError, SlideshowEvent, StatusSnapshot, scan,
    };
}
