use std::time::Duration;

use super::*;
use crate::discovery::parser::feature_bits;

#[test]
fn test_capabilities_from_features() {
    let caps = DeviceCapabilities::from_features(
        feature_bits::PHOTO | feature_bits::VIDEO | feature_bits::LEGACY_PAIRING,
    );

    assert!(caps.supports_photo);
    assert!(caps.supports_video);
    assert!(caps.supports_pairing());
    assert!(!caps.supports_audio);
    assert!(!caps.supports_homekit_pairing);
}

#[test]
fn test_credentials_debug_is_redacted() {
    let creds = Credentials::new(b"secret-key".to_vec());
    let printed = format!("{creds:?}");

    assert!(!printed.contains("secret"));
    assert!(printed.contains("10 bytes"));
}

#[test]
fn test_slideshow_config_transition_is_clamped() {
    let config = SlideshowConfig::new("/photos", vec!["tv".into()], 2).with_video(5.0);
    assert_eq!(config.transition(), Duration::from_secs(2));

    let config = SlideshowConfig::new("/photos", vec!["tv".into()], 5).with_video(-1.0);
    assert_eq!(config.transition(), Duration::ZERO);

    let config = SlideshowConfig::new("/photos", vec!["tv".into()], 5).with_video(1e30);
    assert_eq!(config.transition(), Duration::from_secs(5));

    let config = SlideshowConfig::new("/photos", vec!["tv".into()], 5).with_video(f64::INFINITY);
    assert_eq!(config.transition(), Duration::from_secs(5));
}

#[test]
fn test_slideshow_config_serde_defaults() {
    let json = r#"{"images_directory":"/photos","devices":["a","b"],"display_time":7}"#;
    let config: SlideshowConfig = serde_json::from_str(json).unwrap();

    assert!(!config.video_mode);
    assert!((config.transition_duration - 1.0).abs() < f64::EPSILON);
    assert_eq!(config.devices, vec!["a", "b"]);
}

#[test]
fn test_device_info_socket_addr() {
    let device = DeviceInfo::new("id", "TV", "10.0.0.5".parse().unwrap(), 7000);
    assert_eq!(device.socket_addr().to_string(), "10.0.0.5:7000");
}
