use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SessionStore, StoreError};
use crate::types::{Credentials, DeviceInfo, SlideshowConfig};

/// In-memory storage (non-persistent)
#[derive(Debug, Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<String, Credentials>>,
    devices: RwLock<HashMap<String, DeviceInfo>>,
    last_session: RwLock<Option<SlideshowConfig>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_credentials(&self, device_id: &str) -> Result<Option<Credentials>, StoreError> {
        Ok(self.credentials.read().await.get(device_id).cloned())
    }

    async fn save_credentials(
        &self,
        device_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        self.credentials
            .write()
            .await
            .insert(device_id.to_string(), credentials.clone());
        Ok(())
    }

    async fn remove_credentials(&self, device_id: &str) -> Result<(), StoreError> {
        self.credentials.write().await.remove(device_id);
        Ok(())
    }

    async fn load_last_session_config(&self) -> Result<Option<SlideshowConfig>, StoreError> {
        Ok(self.last_session.read().await.clone())
    }

    async fn save_session_config(&self, config: &SlideshowConfig) -> Result<(), StoreError> {
        *self.last_session.write().await = Some(config.clone());
        Ok(())
    }

    async fn load_devices(&self) -> Result<Vec<DeviceInfo>, StoreError> {
        Ok(self.devices.read().await.values().cloned().collect())
    }

    async fn save_device(&self, device: &DeviceInfo) -> Result<(), StoreError> {
        self.devices
            .write()
            .await
            .insert(device.id.clone(), device.clone());
        Ok(())
    }
}
