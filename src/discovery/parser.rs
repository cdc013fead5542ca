//! Parser for `AirPlay` TXT record data

use std::collections::HashMap;

use crate::types::{DeviceCapabilities, PairingRequirement};

/// Parse TXT records from mDNS response
#[must_use]
pub fn parse_txt_records(records: &[String]) -> HashMap<String, String> {
    records
        .iter()
        .filter_map(|record| {
            let mut parts = record.splitn(2, '=');
            let key = parts.next()?.to_string();
            let value = parts.next().unwrap_or("").to_string();
            Some((key, value))
        })
        .collect()
}

/// Parse features flags from TXT record
///
/// The features value can be in hex format: "0x1234567890ABCDEF"
/// or comma-separated: "0x1234,0x5678"
#[must_use]
pub fn parse_features(features_str: &str) -> Option<DeviceCapabilities> {
    let features = match features_str.split_once(',') {
        // "low,high"
        Some((lo, hi)) => (parse_hex(hi)? << 32) | parse_hex(lo)?,
        None => parse_hex(features_str)?,
    };

    Some(DeviceCapabilities::from_features(features))
}

fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

fn is_truthy(value: Option<&String>) -> bool {
    value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Derive the pairing requirement from TXT records and capabilities
#[must_use]
pub fn parse_pairing_requirement(
    txt: &HashMap<String, String>,
    capabilities: &DeviceCapabilities,
) -> PairingRequirement {
    let demands_pin = is_truthy(txt.get(txt_keys::PIN)) || is_truthy(txt.get(txt_keys::PASSWORD));

    match (demands_pin, capabilities.supports_pairing()) {
        (true, _) => PairingRequirement::Mandatory,
        (false, true) => PairingRequirement::Optional,
        (false, false) if capabilities.raw_features != 0 => PairingRequirement::NotNeeded,
        // No features advertised at all: nothing to pair with
        (false, false) => PairingRequirement::Unsupported,
    }
}

/// Known TXT record keys for `AirPlay`
pub mod txt_keys {
    /// Device ID (MAC address format)
    pub const DEVICE_ID: &str = "deviceid";
    /// Features bitmask
    pub const FEATURES: &str = "features";
    /// Model identifier
    pub const MODEL: &str = "model";
    /// Public key (fallback identifier)
    pub const PUBLIC_KEY: &str = "pk";
    /// Password required
    pub const PASSWORD: &str = "pw";
    /// PIN required
    pub const PIN: &str = "pin";
}

/// `AirPlay` feature bits used for display devices
///
/// Reference: <https://emanuelecozzi.net/docs/airplay2/features>
pub mod feature_bits {
    /// Video supported
    pub const VIDEO: u64 = 1 << 0;
    /// Photo supported
    pub const PHOTO: u64 = 1 << 1;
    /// Slideshow supported
    pub const SLIDESHOW: u64 = 1 << 5;
    /// Screen mirroring
    pub const SCREEN: u64 = 1 << 7;
    /// Audio supported
    pub const AUDIO: u64 = 1 << 9;
    /// Supports legacy pairing
    pub const LEGACY_PAIRING: u64 = 1 << 27;
    /// System pairing
    pub const SYSTEM_PAIRING: u64 = 1 << 43;
    /// `HomeKit` pairing and access control
    pub const HOMEKIT_PAIRING: u64 = 1 << 46;
}
