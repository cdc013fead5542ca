use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{SessionStore, StoreError};
use crate::types::{Credentials, DeviceInfo, SlideshowConfig};

/// On-disk document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    devices: HashMap<String, DeviceInfo>,
    /// Base64 credential blobs keyed by device id
    #[serde(default)]
    credentials: HashMap<String, String>,
    #[serde(default)]
    last_session: Option<SlideshowConfig>,
}

/// JSON file storage
///
/// The whole document is cached in memory and rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<StoreDocument>,
}

impl FileStore {
    /// Open (or create) file storage at the given path
    ///
    /// # Errors
    ///
    /// Returns error if directory cannot be created or file loaded
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let document = Self::load_all(&path).await?;
        tracing::debug!(
            "Opened session store at {} ({} devices)",
            path.display(),
            document.devices.len()
        );

        Ok(Self {
            path,
            cache: RwLock::new(document),
        })
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_all(path: &Path) -> Result<StoreDocument, StoreError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(StoreDocument::default());
        }

        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Ok(StoreDocument::default());
        }

        tokio::task::spawn_blocking(move || serde_json::from_slice(&bytes))
            .await
            .map_err(|e| StoreError::Serialization(format!("Deserialization task failed: {e}")))?
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn save_all(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let document = document.clone();

        let bytes = tokio::task::spawn_blocking(move || serde_json::to_vec_pretty(&document))
            .await
            .map_err(|e| StoreError::Serialization(format!("Serialization task failed: {e}")))?
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load_credentials(&self, device_id: &str) -> Result<Option<Credentials>, StoreError> {
        let cache = self.cache.read().await;
        cache
            .credentials
            .get(device_id)
            .map(|encoded| {
                BASE64
                    .decode(encoded)
                    .map(Credentials::new)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn save_credentials(
        &self,
        device_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StoreError> {
        // Write lock is held across the file write to keep writes ordered
        let mut cache = self.cache.write().await;
        cache
            .credentials
            .insert(device_id.to_string(), BASE64.encode(credentials.as_bytes()));
        self.save_all(&cache).await
    }

    async fn remove_credentials(&self, device_id: &str) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        if cache.credentials.remove(device_id).is_none() {
            return Ok(());
        }
        self.save_all(&cache).await
    }

    async fn load_last_session_config(&self) -> Result<Option<SlideshowConfig>, StoreError> {
        Ok(self.cache.read().await.last_session.clone())
    }

    async fn save_session_config(&self, config: &SlideshowConfig) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        cache.last_session = Some(config.clone());
        self.save_all(&cache).await
    }

    async fn load_devices(&self) -> Result<Vec<DeviceInfo>, StoreError> {
        Ok(self.cache.read().await.devices.values().cloned().collect())
    }

    async fn save_device(&self, device: &DeviceInfo) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        if cache.devices.get(&device.id) == Some(device) {
            return Ok(());
        }
        cache.devices.insert(device.id.clone(), device.clone());
        self.save_all(&cache).await
    }
}
