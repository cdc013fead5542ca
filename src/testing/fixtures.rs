//! Image fixtures on disk

use std::io;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

/// Write a solid-colour image; the format follows the file extension
///
/// # Errors
///
/// Returns an error if the image cannot be encoded or written.
pub fn write_image(path: &Path, width: u32, height: u32, color: [u8; 3]) -> io::Result<()> {
    RgbImage::from_pixel(width, height, Rgb(color))
        .save(path)
        .map_err(io::Error::other)
}

/// Create a temporary directory holding small images with the given names
///
/// Each image gets a distinct colour so content hashes differ.
///
/// # Errors
///
/// Returns an error if the directory or an image cannot be written.
pub fn image_dir(names: &[&str]) -> io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    for (i, name) in names.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let shade = (i * 37 % 256) as u8;
        write_image(&dir.path().join(name), 16, 12, [shade, 255 - shade, 128])?;
    }
    Ok(dir)
}

/// `1.jpg` .. `count.jpg` in a temporary directory
///
/// # Errors
///
/// Returns an error if an image cannot be written.
pub fn numbered_images(count: usize) -> io::Result<TempDir> {
    let names: Vec<String> = (1..=count).map(|i| format!("{i}.jpg")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    image_dir(&refs)
}

/// File name component of a path, for assertions
#[must_use]
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Paths of `names` inside `dir`
#[must_use]
pub fn paths_in(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|n| dir.join(n)).collect()
}
