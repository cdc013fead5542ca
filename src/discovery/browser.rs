use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;

use super::parser::{self, txt_keys};
use crate::error::SlideshowError;
use crate::types::DeviceInfo;

/// One-shot mDNS browser for `AirPlay` display devices
pub struct DeviceBrowser {
    service_type: String,
}

impl DeviceBrowser {
    /// Browse the default `AirPlay` service type
    #[must_use]
    pub fn new() -> Self {
        Self::with_service_type(super::AIRPLAY_SERVICE_TYPE)
    }

    /// Browse a custom service type
    #[must_use]
    pub fn with_service_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
        }
    }

    /// Collect every device that resolves before `timeout` elapses
    ///
    /// Devices removed during the scan are dropped from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the mDNS daemon cannot be initialized.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceInfo>, SlideshowError> {
        let mdns = mdns_sd::ServiceDaemon::new().map_err(|e| discovery_error("create mDNS daemon", &e))?;
        let receiver = mdns
            .browse(&self.service_type)
            .map_err(|e| discovery_error("browse", &e))?;

        let mut stream = receiver.into_stream();
        let mut devices: HashMap<String, DeviceInfo> = HashMap::new();
        let mut fullnames: HashMap<String, String> = HashMap::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => break,
                event = stream.next() => match event {
                    Some(mdns_sd::ServiceEvent::ServiceResolved(info)) => {
                        if let Some(device) = device_from_service(&info) {
                            tracing::debug!("Resolved {} ({}) at {}", device.name, device.id, device.address);
                            fullnames.insert(info.get_fullname().to_string(), device.id.clone());
                            devices.insert(device.id.clone(), device);
                        }
                    }
                    Some(mdns_sd::ServiceEvent::ServiceRemoved(_, fullname)) => {
                        if let Some(id) = fullnames.remove(&fullname) {
                            devices.remove(&id);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        let _ = mdns.stop_browse(&self.service_type);
        let _ = mdns.shutdown();

        tracing::info!("Found {} AirPlay devices", devices.len());
        Ok(devices.into_values().collect())
    }
}

impl Default for DeviceBrowser {
    fn default() -> Self {
        Self::new()
    }
}

fn discovery_error(what: &str, e: &mdns_sd::Error) -> SlideshowError {
    SlideshowError::Io(std::io::Error::other(format!("mDNS failed to {what}: {e}")))
}

fn device_from_service(info: &mdns_sd::ServiceInfo) -> Option<DeviceInfo> {
    let fullname = info.get_fullname();

    let txt_records: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    let address = info
        .get_addresses()
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .copied()?;

    let id = txt_records
        .get(txt_keys::DEVICE_ID)
        .or_else(|| txt_records.get(txt_keys::PUBLIC_KEY))
        .cloned()
        .unwrap_or_else(|| fullname.to_string());

    let capabilities = txt_records
        .get(txt_keys::FEATURES)
        .and_then(|f| parser::parse_features(f))
        .unwrap_or_default();
    let pairing = parser::parse_pairing_requirement(&txt_records, &capabilities);

    // Instance name is the part before the service type
    let name = fullname
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("AirPlay Device")
        .to_string();

    Some(DeviceInfo {
        id,
        name,
        address,
        port: info.get_port(),
        model: txt_records.get(txt_keys::MODEL).cloned(),
        capabilities,
        pairing,
        txt_records,
    })
}
