use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use super::content::{ContentCache, PreparedContent, content_key};
use crate::error::{Result, SlideshowError};
use crate::transport::MediaKind;
use crate::types::EngineConfig;

/// Output parameters for still images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOutput {
    /// Largest width and height
    pub max_size: (u32, u32),
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl ImageOutput {
    /// Parameters from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_size: config.max_image_size,
            quality: config.image_quality.clamp(1, 100),
        }
    }

    fn fingerprint(self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[..4].copy_from_slice(&self.max_size.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.max_size.1.to_le_bytes());
        out[8] = self.quality;
        out
    }
}

/// Normalizes images to bounded-size JPEG, cached by content hash
#[derive(Clone)]
pub struct ImagePreparer {
    output: ImageOutput,
    cache: Arc<Mutex<ContentCache>>,
}

impl ImagePreparer {
    /// Create a preparer with a cache of `cache_entries` items
    #[must_use]
    pub fn new(output: ImageOutput, cache_entries: usize) -> Self {
        Self {
            output,
            cache: Arc::new(Mutex::new(ContentCache::new(cache_entries))),
        }
    }

    /// Output parameters
    #[must_use]
    pub fn output(&self) -> ImageOutput {
        self.output
    }

    /// Read, normalize and encode one image
    ///
    /// # Errors
    ///
    /// Returns a `Resource` error if the file cannot be read or decoded.
    pub async fn prepare(&self, path: &Path) -> Result<PreparedContent> {
        let raw = read_source(path).await?;
        let key = content_key(&[&raw, &self.output.fingerprint()]);

        if let Some(hit) = self.cached(&key) {
            tracing::trace!("Content cache hit for {}", path.display());
            return Ok(hit);
        }

        let output = self.output;
        let owned_path = path.to_path_buf();
        let data = tokio::task::spawn_blocking(move || {
            let image = decode(&owned_path, &raw)?;
            encode_jpeg(&owned_path, &fit_within(image, output.max_size), output.quality)
        })
        .await
        .map_err(|e| resource_error(path, format!("preparation task failed: {e}")))??;

        let content = PreparedContent {
            data: Bytes::from(data),
            kind: MediaKind::Image,
            key,
        };
        self.store(content.clone());
        Ok(content)
    }

    /// Look up prepared content by key
    #[must_use]
    pub fn cached(&self, key: &str) -> Option<PreparedContent> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    /// Cache prepared content
    pub fn store(&self, content: PreparedContent) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(content);
    }
}

pub(crate) fn resource_error(path: &Path, message: impl Into<String>) -> SlideshowError {
    SlideshowError::Resource {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

pub(crate) async fn read_source(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| resource_error(path, format!("cannot read: {e}")))
}

pub(crate) fn decode(path: &Path, raw: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(raw).map_err(|e| resource_error(path, format!("cannot decode: {e}")))
}

/// Downscale to fit `max` preserving aspect ratio; smaller images pass through
#[must_use]
pub fn fit_within(image: DynamicImage, max: (u32, u32)) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max.0 && height <= max.1 {
        return image;
    }
    image.resize(max.0, max.1, FilterType::Lanczos3)
}

pub(crate) fn encode_jpeg(path: &Path, image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(|e| resource_error(path, format!("cannot encode: {e}")))?;
    Ok(out)
}

/// Path helper used in log lines and events
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
