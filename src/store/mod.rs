//! Persistence interface for credentials, known devices and sessions

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::types::{Credentials, DeviceInfo, SlideshowConfig};

/// Abstract storage used by the engine
///
/// Implementations own encryption at rest; the engine hands over opaque
/// credential blobs only.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load credentials for a device
    async fn load_credentials(&self, device_id: &str) -> Result<Option<Credentials>, StoreError>;

    /// Save credentials for a device
    ///
    /// # Errors
    ///
    /// Returns error if storage fails
    async fn save_credentials(
        &self,
        device_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StoreError>;

    /// Forget credentials for a device
    ///
    /// # Errors
    ///
    /// Returns error if removal fails
    async fn remove_credentials(&self, device_id: &str) -> Result<(), StoreError>;

    /// Load the most recently saved slideshow configuration
    async fn load_last_session_config(&self) -> Result<Option<SlideshowConfig>, StoreError>;

    /// Save a slideshow configuration as the most recent one
    ///
    /// # Errors
    ///
    /// Returns error if storage fails
    async fn save_session_config(&self, config: &SlideshowConfig) -> Result<(), StoreError>;

    /// Load every device seen before
    async fn load_devices(&self) -> Result<Vec<DeviceInfo>, StoreError>;

    /// Insert or update a known device
    ///
    /// # Errors
    ///
    /// Returns error if storage fails
    async fn save_device(&self, device: &DeviceInfo) -> Result<(), StoreError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend is unavailable
    #[error("storage not available")]
    NotAvailable,
}
