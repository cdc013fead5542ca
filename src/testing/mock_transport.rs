//! Programmable in-process transport
//!
//! Simulates a network of display devices so the engine can be exercised
//! without hardware. Every behaviour can be changed while the engine runs.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SlideshowError};
use crate::transport::{DeviceLink, DeviceTransport, MediaKind, PairingHandle, PinDirection};
use crate::types::{Credentials, DeviceInfo};

/// Failure injected into a mock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Device demands pairing
    Authorization,
    /// Device cannot show the media
    Capability,
    /// Connection reset
    Transient,
}

impl MockFailure {
    fn to_error(self, device_id: &str) -> SlideshowError {
        match self {
            Self::Authorization => SlideshowError::AuthorizationRequired {
                device_id: device_id.to_string(),
                message: "mock device requires pairing".to_string(),
            },
            Self::Capability => SlideshowError::Capability {
                device_id: device_id.to_string(),
                capability: "mock media".to_string(),
            },
            Self::Transient => SlideshowError::network(device_id, "mock connection reset"),
        }
    }
}

/// Behaviour of one simulated device
#[derive(Debug, Clone)]
pub struct MockDeviceBehavior {
    /// Refuse connects that carry no valid credentials
    pub requires_pairing: bool,
    /// Every connect fails with this
    pub connect_error: Option<MockFailure>,
    /// Every play fails with this
    ///
    /// `Authorization` only applies to links opened without valid
    /// credentials, so pairing clears it.
    pub play_error: Option<MockFailure>,
    /// Transient play failures before plays succeed again
    pub transient_play_failures: u32,
    /// Delay before a play completes
    pub play_delay: Duration,
    /// Panic inside `play_url`
    pub panic_on_play: bool,
    /// Answer health pings
    pub ping_ok: bool,
    /// Who shows the PIN
    pub pin_direction: PinDirection,
    /// PIN shown by the device in [`PinDirection::DeviceProvidesPin`] mode
    pub device_pin: String,
}

impl Default for MockDeviceBehavior {
    fn default() -> Self {
        Self {
            requires_pairing: false,
            connect_error: None,
            play_error: None,
            transient_play_failures: 0,
            play_delay: Duration::ZERO,
            panic_on_play: false,
            ping_ok: true,
            pin_direction: PinDirection::DeviceProvidesPin,
            device_pin: "1234".to_string(),
        }
    }
}

/// One `play_url` call that reached a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPlay {
    /// Target device
    pub device_id: String,
    /// Pushed URL
    pub url: String,
    /// Media kind
    pub kind: MediaKind,
}

#[derive(Default)]
struct MockNetwork {
    devices: Vec<DeviceInfo>,
    behaviors: HashMap<String, MockDeviceBehavior>,
    plays: Vec<RecordedPlay>,
    stops: HashMap<String, u32>,
    connects: HashMap<String, u32>,
    pairings_started: HashMap<String, u32>,
}

/// In-process [`DeviceTransport`]
#[derive(Clone, Default)]
pub struct MockTransport {
    network: Arc<Mutex<MockNetwork>>,
}

fn lock(network: &Mutex<MockNetwork>) -> MutexGuard<'_, MockNetwork> {
    network
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Credentials a mock device hands out and accepts
#[must_use]
pub fn mock_credentials(device_id: &str) -> Credentials {
    Credentials::new(format!("mock-credentials:{device_id}").into_bytes())
}

/// Build a device with a loopback address
#[must_use]
pub fn mock_device(id: &str) -> DeviceInfo {
    let mut device = DeviceInfo::new(
        id,
        format!("Mock {id}"),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        7000,
    );
    device.model = Some("MockTV1,1".to_string());
    device.capabilities = crate::types::DeviceCapabilities::from_features(
        crate::discovery::parser::feature_bits::PHOTO
            | crate::discovery::parser::feature_bits::VIDEO
            | crate::discovery::parser::feature_bits::LEGACY_PAIRING,
    );
    device
}

impl MockTransport {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network of default-behaving devices
    #[must_use]
    pub fn with_devices(ids: &[&str]) -> Self {
        let transport = Self::new();
        for id in ids {
            transport.add_device(mock_device(id), MockDeviceBehavior::default());
        }
        transport
    }

    /// Make a device discoverable
    pub fn add_device(&self, device: DeviceInfo, behavior: MockDeviceBehavior) {
        let mut network = lock(&self.network);
        network.behaviors.insert(device.id.clone(), behavior);
        network.devices.retain(|d| d.id != device.id);
        network.devices.push(device);
    }

    /// Stop advertising a device (existing links keep working)
    pub fn remove_device(&self, device_id: &str) {
        lock(&self.network).devices.retain(|d| d.id != device_id);
    }

    /// Change a device's behaviour
    pub fn update_behavior(&self, device_id: &str, update: impl FnOnce(&mut MockDeviceBehavior)) {
        let mut network = lock(&self.network);
        update(network.behaviors.entry(device_id.to_string()).or_default());
    }

    /// Every play received so far, in arrival order
    #[must_use]
    pub fn plays(&self) -> Vec<RecordedPlay> {
        lock(&self.network).plays.clone()
    }

    /// Plays received by one device
    #[must_use]
    pub fn plays_for(&self, device_id: &str) -> Vec<RecordedPlay> {
        lock(&self.network)
            .plays
            .iter()
            .filter(|p| p.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Forget recorded plays
    pub fn clear_plays(&self) {
        lock(&self.network).plays.clear();
    }

    /// Number of `stop` calls a device received
    #[must_use]
    pub fn stop_count(&self, device_id: &str) -> u32 {
        lock(&self.network).stops.get(device_id).copied().unwrap_or(0)
    }

    /// Number of connect attempts a device received
    #[must_use]
    pub fn connect_count(&self, device_id: &str) -> u32 {
        lock(&self.network)
            .connects
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of pairing exchanges a device received
    #[must_use]
    pub fn pairing_count(&self, device_id: &str) -> u32 {
        lock(&self.network)
            .pairings_started
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    fn behavior(&self, device_id: &str) -> MockDeviceBehavior {
        lock(&self.network)
            .behaviors
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DeviceInfo>> {
        Ok(lock(&self.network).devices.clone())
    }

    async fn connect(
        &self,
        device: &DeviceInfo,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn DeviceLink>> {
        *lock(&self.network)
            .connects
            .entry(device.id.clone())
            .or_default() += 1;

        let behavior = self.behavior(&device.id);
        if let Some(failure) = behavior.connect_error {
            return Err(failure.to_error(&device.id));
        }

        let authorized = credentials == Some(&mock_credentials(&device.id));
        if behavior.requires_pairing && !authorized {
            return Err(MockFailure::Authorization.to_error(&device.id));
        }

        Ok(Arc::new(MockLink {
            device_id: device.id.clone(),
            authorized,
            network: Arc::clone(&self.network),
        }))
    }

    async fn begin_pairing(&self, device: &DeviceInfo) -> Result<Box<dyn PairingHandle>> {
        *lock(&self.network)
            .pairings_started
            .entry(device.id.clone())
            .or_default() += 1;

        let behavior = self.behavior(&device.id);
        Ok(Box::new(MockPairing {
            device_id: device.id.clone(),
            direction: behavior.pin_direction,
            device_pin: behavior.device_pin,
        }))
    }
}

struct MockLink {
    device_id: String,
    authorized: bool,
    network: Arc<Mutex<MockNetwork>>,
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn play_url(&self, url: &str, kind: MediaKind) -> Result<()> {
        let behavior = {
            let mut network = lock(&self.network);
            let behavior = network
                .behaviors
                .entry(self.device_id.clone())
                .or_default();
            let snapshot = behavior.clone();
            if behavior.transient_play_failures > 0 {
                behavior.transient_play_failures -= 1;
            }
            snapshot
        };

        if !behavior.play_delay.is_zero() {
            tokio::time::sleep(behavior.play_delay).await;
        }

        if behavior.panic_on_play {
            panic!("mock device {} crashed", self.device_id);
        }

        if behavior.transient_play_failures > 0 {
            return Err(MockFailure::Transient.to_error(&self.device_id));
        }

        match behavior.play_error {
            Some(MockFailure::Authorization) if self.authorized => {}
            Some(failure) => return Err(failure.to_error(&self.device_id)),
            None => {}
        }

        lock(&self.network).plays.push(RecordedPlay {
            device_id: self.device_id.clone(),
            url: url.to_string(),
            kind,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *lock(&self.network)
            .stops
            .entry(self.device_id.clone())
            .or_default() += 1;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.behavior_ping_ok() {
            Ok(())
        } else {
            Err(MockFailure::Transient.to_error(&self.device_id))
        }
    }

    fn local_addr(&self) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl MockLink {
    fn behavior_ping_ok(&self) -> bool {
        lock(&self.network)
            .behaviors
            .get(&self.device_id)
            .is_none_or(|b| b.ping_ok)
    }
}

struct MockPairing {
    device_id: String,
    direction: PinDirection,
    device_pin: String,
}

#[async_trait]
impl PairingHandle for MockPairing {
    fn direction(&self) -> PinDirection {
        self.direction
    }

    async fn finish(&mut self, pin: &str) -> Result<Credentials> {
        // The controller already checked its own PIN; the device accepts it
        if self.direction == PinDirection::DeviceProvidesPin && pin != self.device_pin {
            return Err(SlideshowError::PairingFailed {
                device_id: self.device_id.clone(),
                message: "incorrect PIN".to_string(),
            });
        }
        Ok(mock_credentials(&self.device_id))
    }
}
