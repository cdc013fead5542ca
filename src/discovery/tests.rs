use std::collections::HashMap;

use super::parser::{self, feature_bits};
use crate::types::{DeviceCapabilities, PairingRequirement};

#[test]
fn test_parse_txt_records() {
    let records = vec![
        "deviceid=AA:BB:CC:DD:EE:FF".to_string(),
        "model=AppleTV6,2".to_string(),
        "pin=".to_string(),
    ];

    let parsed = parser::parse_txt_records(&records);

    assert_eq!(parsed.get("deviceid"), Some(&"AA:BB:CC:DD:EE:FF".to_string()));
    assert_eq!(parsed.get("model"), Some(&"AppleTV6,2".to_string()));
    assert_eq!(parsed.get("pin"), Some(&String::new()));
}

#[test]
fn test_parse_features_forms() {
    let caps = parser::parse_features("0x3").unwrap();
    assert!(caps.supports_video);
    assert!(caps.supports_photo);

    let caps = parser::parse_features("0X5A7FFFF7,0x1E").unwrap();
    assert_eq!(caps.raw_features, (0x1E_u64 << 32) | 0x5A7F_FFF7);

    assert!(parser::parse_features("zz").is_none());
}

#[test]
fn test_pairing_requirement_mandatory_when_pin_flagged() {
    let caps = DeviceCapabilities::from_features(feature_bits::PHOTO);
    let txt: HashMap<String, String> = [("pin".to_string(), "true".to_string())].into();

    assert_eq!(
        parser::parse_pairing_requirement(&txt, &caps),
        PairingRequirement::Mandatory
    );
}

#[test]
fn test_pairing_requirement_from_features() {
    let txt = HashMap::new();

    let caps = DeviceCapabilities::from_features(feature_bits::PHOTO | feature_bits::HOMEKIT_PAIRING);
    assert_eq!(
        parser::parse_pairing_requirement(&txt, &caps),
        PairingRequirement::Optional
    );

    let caps = DeviceCapabilities::from_features(feature_bits::PHOTO);
    assert_eq!(
        parser::parse_pairing_requirement(&txt, &caps),
        PairingRequirement::NotNeeded
    );

    assert_eq!(
        parser::parse_pairing_requirement(&txt, &DeviceCapabilities::default()),
        PairingRequirement::Unsupported
    );
}
