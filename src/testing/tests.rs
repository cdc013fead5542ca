use super::*;
use crate::error::ErrorKind;
use crate::transport::{DeviceTransport, MediaKind, PinDirection};

#[tokio::test]
async fn test_mock_requires_pairing_until_credentials() {
    let transport = MockTransport::new();
    transport.add_device(
        mock_device("tv"),
        MockDeviceBehavior {
            requires_pairing: true,
            ..Default::default()
        },
    );

    let device = mock_device("tv");
    let err = transport.connect(&device, None).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let creds = mock_credentials("tv");
    assert!(transport.connect(&device, Some(&creds)).await.is_ok());
    assert_eq!(transport.connect_count("tv"), 2);
}

#[tokio::test]
async fn test_mock_transient_failures_recover() {
    let transport = MockTransport::with_devices(&["tv"]);
    transport.update_behavior("tv", |b| b.transient_play_failures = 1);

    let link = transport.connect(&mock_device("tv"), None).await.unwrap();
    let first = link.play_url("http://x/1", MediaKind::Image).await;
    assert!(first.unwrap_err().is_transient());

    link.play_url("http://x/2", MediaKind::Image).await.unwrap();
    assert_eq!(transport.plays_for("tv").len(), 1);
}

#[tokio::test]
async fn test_mock_pairing_device_pin() {
    let transport = MockTransport::with_devices(&["tv"]);
    let mut handle = transport.begin_pairing(&mock_device("tv")).await.unwrap();
    assert_eq!(handle.direction(), PinDirection::DeviceProvidesPin);

    assert!(handle.finish("0000").await.is_err());
    assert_eq!(handle.finish("1234").await.unwrap(), mock_credentials("tv"));
}

#[test]
fn test_numbered_images() {
    let dir = numbered_images(3).unwrap();
    for i in 1..=3 {
        assert!(dir.path().join(format!("{i}.jpg")).exists());
    }
}
