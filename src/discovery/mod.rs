//! mDNS discovery of `AirPlay` display devices

mod browser;
pub mod parser;
#[cfg(test)]
mod tests;

pub use browser::DeviceBrowser;
pub use parser::parse_txt_records;

use std::time::Duration;

use crate::error::SlideshowError;
use crate::types::DeviceInfo;

/// Service type for `AirPlay` discovery
pub const AIRPLAY_SERVICE_TYPE: &str = "_airplay._tcp.local.";

/// Scan for devices with timeout
///
/// # Example
///
/// ```rust,no_run
/// use airplay_slideshow::discovery::scan;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), airplay_slideshow::SlideshowError> {
/// for device in scan(Duration::from_secs(5)).await? {
///     println!("{}: {}", device.name, device.address);
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if the mDNS daemon cannot be initialized.
pub async fn scan(timeout: Duration) -> Result<Vec<DeviceInfo>, SlideshowError> {
    DeviceBrowser::new().scan(timeout).await
}
