use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::reconnect::ReconnectPolicy;
use super::state::{Device, DeviceState, StateChange};
use crate::error::{Result, SlideshowError};
use crate::transport::DeviceLink;
use crate::types::{Credentials, DeviceInfo};

/// Why a connection attempt was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPurpose {
    Manual,
    Reconnect { attempt: u32 },
}

#[derive(Debug, Clone, Copy)]
struct ReconnectPlan {
    attempt: u32,
    due: Instant,
}

/// Result of [`DeviceRegistry::begin_connect`]
#[derive(Debug, Clone)]
pub enum ConnectStart {
    /// Device already has a live link
    AlreadyConnected,
    /// Caller must run the connection attempt for this device
    Started(DeviceInfo),
}

/// How a finished connection attempt was applied
pub enum ConnectResolution {
    /// Device is now `Connected`
    Connected,
    /// Device demands pairing
    PairingRequired(SlideshowError),
    /// Manual attempt failed
    Failed(SlideshowError),
    /// Reconnect failed; another attempt is scheduled
    RetryScheduled {
        /// Upcoming attempt number
        attempt: u32,
        /// Delay before it runs
        delay: Duration,
        /// Failure of the attempt that just ran
        error: SlideshowError,
    },
    /// Reconnect budget exhausted; device reverted to `Discovered`
    GaveUp(SlideshowError),
    /// Device left `Connecting` while the attempt ran; the link, if any,
    /// must be closed
    Stale(Option<Arc<dyn DeviceLink>>),
}

/// Authoritative table of known devices
///
/// Owned by the engine task; every mutation records a [`StateChange`]
/// that the owner drains with [`DeviceRegistry::take_changes`].
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
    links: HashMap<String, Arc<dyn DeviceLink>>,
    credentials: HashMap<String, Credentials>,
    connecting: HashMap<String, ConnectPurpose>,
    reconnects: HashMap<String, ReconnectPlan>,
    policy: ReconnectPolicy,
    changes: Vec<StateChange>,
}

impl DeviceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            devices: BTreeMap::new(),
            links: HashMap::new(),
            credentials: HashMap::new(),
            connecting: HashMap::new(),
            reconnects: HashMap::new(),
            policy,
            changes: Vec::new(),
        }
    }

    // ===== Queries =====

    /// Look up a device
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    /// Check if a device is known
    #[must_use]
    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Current state of a device
    #[must_use]
    pub fn state(&self, device_id: &str) -> Option<DeviceState> {
        self.devices.get(device_id).map(|d| d.state)
    }

    /// Check if a device has a live link
    #[must_use]
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.state(device_id) == Some(DeviceState::Connected)
    }

    /// Live link of a connected device
    #[must_use]
    pub fn link(&self, device_id: &str) -> Option<Arc<dyn DeviceLink>> {
        self.links.get(device_id).cloned()
    }

    /// In-memory credentials of a connected device
    #[must_use]
    pub fn credentials(&self, device_id: &str) -> Option<&Credentials> {
        self.credentials.get(device_id)
    }

    /// Snapshot of every device, ordered by id
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    /// Ids of connected devices
    #[must_use]
    pub fn connected_ids(&self) -> Vec<String> {
        self.devices
            .values()
            .filter(|d| d.state.is_connected())
            .map(|d| d.info.id.clone())
            .collect()
    }

    /// Links of every connected device, for health checks
    #[must_use]
    pub fn connected_links(&self) -> Vec<(String, Arc<dyn DeviceLink>)> {
        self.links
            .iter()
            .filter(|(id, _)| self.is_connected(id))
            .map(|(id, link)| (id.clone(), Arc::clone(link)))
            .collect()
    }

    /// Earliest scheduled reconnect
    #[must_use]
    pub fn next_reconnect_due(&self) -> Option<Instant> {
        self.reconnects.values().map(|p| p.due).min()
    }

    /// Drain recorded state transitions
    pub fn take_changes(&mut self) -> Vec<StateChange> {
        std::mem::take(&mut self.changes)
    }

    // ===== Discovery =====

    /// Merge a discovery result into the table
    ///
    /// Devices with a live link or an attempt in flight only get their name
    /// and `last_seen` refreshed. Returns the records that are new or changed.
    pub fn merge_discovered(&mut self, found: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
        let now = Utc::now();
        let mut updated = Vec::new();

        for info in found {
            match self.devices.get_mut(&info.id) {
                Some(device) if device.state.is_connected() || device.state.is_busy() => {
                    device.last_seen = Some(now);
                    if device.info.name != info.name {
                        device.info.name = info.name;
                        updated.push(device.info.clone());
                    }
                }
                Some(device) => {
                    device.last_seen = Some(now);
                    if device.info != info {
                        device.info = info;
                        updated.push(device.info.clone());
                    }
                }
                None => {
                    tracing::info!("Discovered {} ({})", info.name, info.id);
                    let mut device = Device::new(info.clone());
                    device.last_seen = Some(now);
                    self.devices.insert(info.id.clone(), device);
                    updated.push(info);
                }
            }
        }

        updated
    }

    /// Add devices loaded from storage that are not yet known
    pub fn restore_known(&mut self, known: Vec<DeviceInfo>) {
        for info in known {
            self.devices
                .entry(info.id.clone())
                .or_insert_with(|| Device::new(info));
        }
    }

    // ===== Connection =====

    /// Start a manual connection attempt
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` for unknown devices, `Conflict` while another
    /// connect or a pairing is in progress.
    pub fn begin_connect(&mut self, device_id: &str) -> Result<ConnectStart> {
        let device = self.require(device_id)?;
        match device.state {
            DeviceState::Connected => return Ok(ConnectStart::AlreadyConnected),
            DeviceState::Connecting | DeviceState::Pairing => {
                return Err(SlideshowError::Conflict {
                    message: format!("device {device_id} is busy ({:?})", device.state),
                });
            }
            _ => {}
        }

        let info = device.info.clone();
        self.reconnects.remove(device_id);
        self.connecting
            .insert(device_id.to_string(), ConnectPurpose::Manual);
        self.transition(device_id, DeviceState::Connecting)?;
        Ok(ConnectStart::Started(info))
    }

    /// Move every due reconnect to `Connecting`
    ///
    /// Returns the devices the caller must now connect, with the attempt number.
    pub fn take_due_reconnects(&mut self, now: Instant) -> Vec<(DeviceInfo, u32)> {
        let due: Vec<(String, u32)> = self
            .reconnects
            .iter()
            .filter(|(_, plan)| plan.due <= now)
            .map(|(id, plan)| (id.clone(), plan.attempt))
            .collect();

        let mut started = Vec::new();
        for (id, attempt) in due {
            self.reconnects.remove(&id);
            if self.state(&id) != Some(DeviceState::Disconnected) {
                continue;
            }
            if self.transition(&id, DeviceState::Connecting).is_err() {
                continue;
            }
            self.connecting
                .insert(id.clone(), ConnectPurpose::Reconnect { attempt });
            if let Some(device) = self.devices.get(&id) {
                tracing::info!("Reconnecting {} (attempt {})", id, attempt);
                started.push((device.info.clone(), attempt));
            }
        }
        started
    }

    /// Apply the result of a connection attempt
    pub fn complete_connect(
        &mut self,
        device_id: &str,
        result: Result<(Arc<dyn DeviceLink>, Option<Credentials>)>,
    ) -> ConnectResolution {
        let purpose = self.connecting.remove(device_id);
        let Some(purpose) = purpose.filter(|_| self.state(device_id) == Some(DeviceState::Connecting))
        else {
            tracing::debug!("Discarding stale connect result for {}", device_id);
            return ConnectResolution::Stale(result.ok().map(|(link, _)| link));
        };

        match result {
            Ok((link, credentials)) => {
                self.install_link(device_id, link, credentials);
                let _ = self.transition(device_id, DeviceState::Connected);
                tracing::info!("Device {} connected", device_id);
                ConnectResolution::Connected
            }
            Err(e) if e.requires_pairing() => {
                self.record_error(device_id, &e);
                let _ = self.transition(device_id, DeviceState::PairingRequired);
                tracing::info!("Device {} requires pairing", device_id);
                ConnectResolution::PairingRequired(e)
            }
            Err(e) => match purpose {
                ConnectPurpose::Manual => {
                    self.record_failure(device_id, &e);
                    let _ = self.transition(device_id, DeviceState::Failed);
                    tracing::warn!("Connect to {} failed: {}", device_id, e);
                    ConnectResolution::Failed(e)
                }
                ConnectPurpose::Reconnect { attempt } => {
                    self.record_failure(device_id, &e);
                    let _ = self.transition(device_id, DeviceState::Disconnected);

                    if self.policy.allows(attempt) {
                        let next = attempt + 1;
                        let delay = self.schedule_reconnect(device_id, next);
                        tracing::warn!(
                            "Reconnect {} of {} to {} failed, retrying in {:?}: {}",
                            attempt,
                            self.policy.max_attempts,
                            device_id,
                            delay,
                            e
                        );
                        ConnectResolution::RetryScheduled {
                            attempt: next,
                            delay,
                            error: e,
                        }
                    } else {
                        let _ = self.transition(device_id, DeviceState::Discovered);
                        tracing::error!("Giving up reconnecting {}: {}", device_id, e);
                        ConnectResolution::GaveUp(e)
                    }
                }
            },
        }
    }

    /// Release a device's link; always ends in `Disconnected`
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` for unknown devices.
    pub fn disconnect(&mut self, device_id: &str) -> Result<Option<Arc<dyn DeviceLink>>> {
        self.require(device_id)?;
        self.reconnects.remove(device_id);
        self.connecting.remove(device_id);
        let link = self.drop_link(device_id);
        let _ = self.transition(device_id, DeviceState::Disconnected);
        tracing::info!("Device {} disconnected", device_id);
        Ok(link)
    }

    /// Connected device stopped answering: disconnect and schedule a reconnect
    ///
    /// Returns the link to close, or `None` if the device was not connected.
    pub fn mark_lost(&mut self, device_id: &str, error: &SlideshowError) -> Option<Arc<dyn DeviceLink>> {
        if !self.is_connected(device_id) {
            return None;
        }

        let link = self.drop_link(device_id);
        self.record_error(device_id, error);
        let _ = self.transition(device_id, DeviceState::Disconnected);

        if self.policy.max_attempts > 0 {
            let delay = self.schedule_reconnect(device_id, 1);
            tracing::warn!("Lost {} ({}), reconnecting in {:?}", device_id, error, delay);
        } else {
            let _ = self.transition(device_id, DeviceState::Discovered);
            tracing::warn!("Lost {} ({})", device_id, error);
        }
        link
    }

    /// Connected device rejected content until paired
    ///
    /// Returns the link to close, or `None` if the device was not connected.
    pub fn mark_pairing_required(
        &mut self,
        device_id: &str,
        error: &SlideshowError,
    ) -> Option<Arc<dyn DeviceLink>> {
        if !self.is_connected(device_id) {
            return None;
        }
        let link = self.drop_link(device_id);
        self.record_error(device_id, error);
        let _ = self.transition(device_id, DeviceState::PairingRequired);
        link
    }

    // ===== Pairing =====

    /// Move a device into `Pairing`
    ///
    /// # Errors
    ///
    /// `DeviceNotFound`, `InvalidState` for connected devices and `Conflict`
    /// while another attempt is in progress.
    pub fn begin_pairing(&mut self, device_id: &str) -> Result<DeviceInfo> {
        let device = self.require(device_id)?;
        match device.state {
            DeviceState::Connected => {
                return Err(SlideshowError::invalid_state(
                    format!("device {device_id} is already connected"),
                    device.state,
                ));
            }
            DeviceState::Connecting | DeviceState::Pairing => {
                return Err(SlideshowError::Conflict {
                    message: format!("device {device_id} is busy ({:?})", device.state),
                });
            }
            _ => {}
        }

        let info = device.info.clone();
        self.reconnects.remove(device_id);
        self.transition(device_id, DeviceState::Pairing)?;
        Ok(info)
    }

    /// Pairing produced credentials and a live link
    ///
    /// Returns `false` (and hands nothing over) if the device left `Pairing`.
    pub fn finish_pairing(
        &mut self,
        device_id: &str,
        link: Arc<dyn DeviceLink>,
        credentials: Credentials,
    ) -> bool {
        if self.state(device_id) != Some(DeviceState::Pairing) {
            return false;
        }
        self.install_link(device_id, link, Some(credentials));
        let _ = self.transition(device_id, DeviceState::Connected);
        tracing::info!("Device {} paired and connected", device_id);
        true
    }

    /// Pairing ended without a link
    ///
    /// Cancelled sessions return to `PairingRequired`, failed ones to `Failed`.
    pub fn abort_pairing(&mut self, device_id: &str, cancelled: bool, message: Option<&str>) {
        if self.state(device_id) != Some(DeviceState::Pairing) {
            return;
        }
        if let (Some(device), Some(message)) = (self.devices.get_mut(device_id), message) {
            device.last_error = Some(message.to_string());
            device.retry_count += 1;
        }
        let next = if cancelled {
            DeviceState::PairingRequired
        } else {
            DeviceState::Failed
        };
        let _ = self.transition(device_id, next);
    }

    /// Release every link, for shutdown
    pub fn drain_links(&mut self) -> Vec<Arc<dyn DeviceLink>> {
        let ids: Vec<String> = self.links.keys().cloned().collect();
        let mut links = Vec::new();
        for id in ids {
            if let Some(link) = self.drop_link(&id) {
                links.push(link);
            }
            let _ = self.transition(&id, DeviceState::Disconnected);
        }
        self.reconnects.clear();
        links
    }

    // ===== Internals =====

    fn require(&self, device_id: &str) -> Result<&Device> {
        self.devices
            .get(device_id)
            .ok_or_else(|| SlideshowError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    fn transition(&mut self, device_id: &str, next: DeviceState) -> Result<()> {
        let device = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| SlideshowError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;

        let old = device.state;
        if old == next {
            return Ok(());
        }
        if !old.can_transition_to(next) {
            tracing::warn!("Rejected transition {:?} -> {:?} for {}", old, next, device_id);
            return Err(SlideshowError::invalid_state(
                format!("cannot move {device_id} to {next:?}"),
                old,
            ));
        }

        device.state = next;
        tracing::debug!("Device {} {:?} -> {:?}", device_id, old, next);
        self.changes.push(StateChange {
            device_id: device_id.to_string(),
            old,
            new: next,
        });
        Ok(())
    }

    fn install_link(
        &mut self,
        device_id: &str,
        link: Arc<dyn DeviceLink>,
        credentials: Option<Credentials>,
    ) {
        self.links.insert(device_id.to_string(), link);
        match credentials {
            Some(credentials) => {
                self.credentials.insert(device_id.to_string(), credentials);
            }
            None => {
                self.credentials.remove(device_id);
            }
        }
        if let Some(device) = self.devices.get_mut(device_id) {
            device.last_error = None;
            device.retry_count = 0;
        }
    }

    fn drop_link(&mut self, device_id: &str) -> Option<Arc<dyn DeviceLink>> {
        self.credentials.remove(device_id);
        self.links.remove(device_id)
    }

    fn record_error(&mut self, device_id: &str, error: &SlideshowError) {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.last_error = Some(error.to_string());
        }
    }

    fn record_failure(&mut self, device_id: &str, error: &SlideshowError) {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.last_error = Some(error.to_string());
            device.retry_count += 1;
        }
    }

    fn schedule_reconnect(&mut self, device_id: &str, attempt: u32) -> Duration {
        let delay = self.policy.delay_for(attempt);
        self.reconnects.insert(
            device_id.to_string(),
            ReconnectPlan {
                attempt,
                due: Instant::now() + delay,
            },
        );
        delay
    }
}
