use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Identity and capabilities of a display device found on the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable network identifier (from the `deviceid` TXT record)
    pub id: String,

    /// Human-readable name (e.g., "Living Room Apple TV")
    pub name: String,

    /// Resolved address
    pub address: IpAddr,

    /// `AirPlay` control port
    pub port: u16,

    /// Model identifier (e.g., "AppleTV6,2")
    pub model: Option<String>,

    /// Capabilities parsed from the features bitmask
    #[serde(default)]
    pub capabilities: DeviceCapabilities,

    /// What the device advertises about pairing
    #[serde(default)]
    pub pairing: PairingRequirement,

    /// Raw TXT record data
    #[serde(default)]
    pub txt_records: HashMap<String, String>,
}

impl DeviceInfo {
    /// Create a device with default capabilities
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address,
            port,
            model: None,
            capabilities: DeviceCapabilities::default(),
            pairing: PairingRequirement::default(),
            txt_records: HashMap::new(),
        }
    }

    /// Socket address of the control endpoint
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Device capability flags parsed from `AirPlay` features
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceCapabilities {
    /// Can show pushed photos
    pub supports_photo: bool,

    /// Can play pushed video URLs
    pub supports_video: bool,

    /// Has the native slideshow feature
    pub supports_slideshow: bool,

    /// Supports screen mirroring (info only)
    pub supports_screen: bool,

    /// Supports audio streaming (info only)
    pub supports_audio: bool,

    /// Supports legacy PIN pairing
    pub supports_legacy_pairing: bool,

    /// Supports `HomeKit` pairing
    pub supports_homekit_pairing: bool,

    /// Raw features bitmask
    pub raw_features: u64,
}

impl DeviceCapabilities {
    /// Parse capabilities from an `AirPlay` features bitmask
    ///
    /// Features are documented at:
    /// <https://emanuelecozzi.net/docs/airplay2/features>
    #[must_use]
    pub fn from_features(features: u64) -> Self {
        use crate::discovery::parser::feature_bits as bits;

        Self {
            supports_video: features & bits::VIDEO != 0,
            supports_photo: features & bits::PHOTO != 0,
            supports_slideshow: features & bits::SLIDESHOW != 0,
            supports_screen: features & bits::SCREEN != 0,
            supports_audio: features & bits::AUDIO != 0,
            supports_legacy_pairing: features & bits::LEGACY_PAIRING != 0,
            supports_homekit_pairing: features & (bits::HOMEKIT_PAIRING | bits::SYSTEM_PAIRING)
                != 0,
            raw_features: features,
        }
    }

    /// Whether any form of PIN pairing is offered
    #[must_use]
    pub fn supports_pairing(&self) -> bool {
        self.supports_legacy_pairing || self.supports_homekit_pairing
    }
}

/// Pairing requirement advertised by a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingRequirement {
    /// Content is accepted without pairing
    #[default]
    NotNeeded,
    /// Pairing is possible but not demanded up front
    Optional,
    /// Device demands a PIN before accepting content
    Mandatory,
    /// Device offers no pairing at all
    Unsupported,
}

/// Opaque credential blob produced by a successful pairing
///
/// Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(Vec<u8>);

impl Credentials {
    /// Wrap raw credential bytes
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes for the transport
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if the blob is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(<{} bytes>)", self.0.len())
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
