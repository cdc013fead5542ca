use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;

use super::command::PairingStart;
use super::handle::EngineHandle;
use crate::error::{Result, SlideshowError};
use crate::pairing::PairingStatus;
use crate::registry::Device;
use crate::state::StatusSnapshot;
use crate::types::SlideshowConfig;

/// Blocking façade over an [`EngineHandle`]
///
/// For callers on ordinary threads (UI loops, FFI). Each call runs on the
/// engine's runtime and gives up after the bridge timeout with
/// [`SlideshowError::BridgeTimeout`]; the engine keeps processing the
/// request in that case.
///
/// Must not be called from inside the runtime itself: `block_on` on a
/// runtime thread panics.
#[derive(Clone)]
pub struct Bridge {
    runtime: Handle,
    engine: EngineHandle,
    timeout: Duration,
}

impl Bridge {
    /// Wrap an engine running on `runtime`
    #[must_use]
    pub fn new(runtime: Handle, engine: EngineHandle, timeout: Duration) -> Self {
        Self {
            runtime,
            engine,
            timeout,
        }
    }

    /// Underlying async handle
    #[must_use]
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Bound on every call
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Bridge call timed out after {:?}", timeout);
                    Err(SlideshowError::BridgeTimeout(timeout))
                }
            }
        })
    }

    /// See [`EngineHandle::discover`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn discover(&self) -> Result<Vec<Device>> {
        self.call(self.engine.discover())
    }

    /// See [`EngineHandle::devices`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn devices(&self) -> Result<Vec<Device>> {
        self.call(self.engine.devices())
    }

    /// See [`EngineHandle::connect`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn connect(&self, device_id: &str) -> Result<()> {
        self.call(self.engine.connect(device_id))
    }

    /// See [`EngineHandle::disconnect`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn disconnect(&self, device_id: &str) -> Result<()> {
        self.call(self.engine.disconnect(device_id))
    }

    /// See [`EngineHandle::start_pairing`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn start_pairing(&self, device_id: &str) -> Result<PairingStart> {
        self.call(self.engine.start_pairing(device_id))
    }

    /// See [`EngineHandle::submit_pin`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn submit_pin(&self, device_id: &str, pin: &str) -> Result<()> {
        self.call(self.engine.submit_pin(device_id, pin))
    }

    /// See [`EngineHandle::cancel_pairing`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn cancel_pairing(&self, device_id: &str) -> Result<()> {
        self.call(self.engine.cancel_pairing(device_id))
    }

    /// See [`EngineHandle::pairing_status`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn pairing_status(&self, device_id: &str) -> Result<Option<PairingStatus>> {
        self.call(self.engine.pairing_status(device_id))
    }

    /// See [`EngineHandle::configure`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn configure(&self, config: SlideshowConfig) -> Result<()> {
        self.call(self.engine.configure(config))
    }

    /// See [`EngineHandle::restore_last_session`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn restore_last_session(&self) -> Result<bool> {
        self.call(self.engine.restore_last_session())
    }

    /// See [`EngineHandle::start`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn start(&self) -> Result<()> {
        self.call(self.engine.start())
    }

    /// See [`EngineHandle::stop`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn stop(&self) -> Result<()> {
        self.call(self.engine.stop())
    }

    /// See [`EngineHandle::next`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn next(&self) -> Result<()> {
        self.call(self.engine.next())
    }

    /// See [`EngineHandle::previous`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn previous(&self) -> Result<()> {
        self.call(self.engine.previous())
    }

    /// See [`EngineHandle::update_display_time`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn update_display_time(&self, seconds: u64) -> Result<()> {
        self.call(self.engine.update_display_time(seconds))
    }

    /// See [`EngineHandle::status`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn status(&self) -> Result<StatusSnapshot> {
        self.call(self.engine.status())
    }

    /// See [`EngineHandle::shutdown`]
    ///
    /// # Errors
    ///
    /// Engine errors, or `BridgeTimeout`.
    pub fn shutdown(&self) -> Result<()> {
        self.call(self.engine.shutdown())
    }
}
