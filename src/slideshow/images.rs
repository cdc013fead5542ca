use std::path::{Path, PathBuf};

use crate::error::{Result, SlideshowError};

/// Check whether `path` has one of `extensions` (case-insensitive)
#[must_use]
pub fn is_supported(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Resolve the ordered image set of a directory
///
/// Files are filtered by extension and sorted by lowercase file stem, then
/// by full file name.
///
/// # Errors
///
/// Returns a `Validation` error if the directory does not exist or holds no
/// supported image, and a `Resource` error if it cannot be listed.
pub async fn load_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(directory).await.map_err(|_| {
        SlideshowError::validation(format!(
            "images directory does not exist: {}",
            directory.display()
        ))
    })?;
    if !metadata.is_dir() {
        return Err(SlideshowError::validation(format!(
            "not a directory: {}",
            directory.display()
        )));
    }

    let listing_error = |e: std::io::Error| SlideshowError::Resource {
        path: directory.to_path_buf(),
        message: format!("cannot list directory: {e}"),
    };

    let mut entries = tokio::fs::read_dir(directory).await.map_err(listing_error)?;
    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
        let path = entry.path();
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if is_file && is_supported(&path, extensions) {
            images.push(path);
        }
    }

    if images.is_empty() {
        return Err(SlideshowError::validation(format!(
            "no supported images found in {}",
            directory.display()
        )));
    }

    images.sort_by_cached_key(|path| (sort_stem(path), file_name(path)));
    tracing::info!("Loaded {} images from {}", images.len(), directory.display());
    Ok(images)
}

fn sort_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
