//! Device-facing capabilities consumed by the engine
//!
//! The engine never speaks a wire protocol itself. It drives devices through
//! [`DeviceTransport`], the live [`DeviceLink`] returned by a successful
//! connect, and the [`PairingHandle`] of an ongoing PIN exchange.

#[cfg(feature = "http-transport")]
mod http;

#[cfg(feature = "http-transport")]
pub use http::HttpTransport;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Credentials, DeviceInfo};

/// Kind of media behind a pushed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still JPEG image
    Image,
    /// MP4 clip
    Video,
}

impl MediaKind {
    /// MIME type served for this media
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// Which side shows the PIN during pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    /// Device shows a PIN the user types into the controller
    DeviceProvidesPin,
    /// Controller generates a PIN the user types on the device
    ControllerProvidesPin,
}

/// Network access to display devices
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Browse the network for devices
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceInfo>>;

    /// Open a live link to a device
    ///
    /// An [`ErrorKind::Authorization`](crate::ErrorKind::Authorization)
    /// error means the device must be paired first.
    async fn connect(
        &self,
        device: &DeviceInfo,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn DeviceLink>>;

    /// Start a PIN exchange with a device
    async fn begin_pairing(&self, device: &DeviceInfo) -> Result<Box<dyn PairingHandle>>;
}

/// A connected device
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Ask the device to fetch and show the media at `url`
    async fn play_url(&self, url: &str, kind: MediaKind) -> Result<()>;

    /// Stop whatever the device is showing
    async fn stop(&self) -> Result<()>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;

    /// Local address used to reach the device, when known
    fn local_addr(&self) -> Option<IpAddr> {
        None
    }

    /// Release the link
    async fn close(&self) {}
}

/// Device side of one PIN exchange
#[async_trait]
pub trait PairingHandle: Send {
    /// Who shows the PIN
    fn direction(&self) -> PinDirection;

    /// Complete the exchange with the PIN the user entered
    ///
    /// A [`SlideshowError::PairingFailed`](crate::SlideshowError::PairingFailed)
    /// means the PIN was rejected and another attempt may follow.
    async fn finish(&mut self, pin: &str) -> Result<Credentials>;

    /// Abort the exchange and release device-side resources
    async fn close(&mut self) {}
}
