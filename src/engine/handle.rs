use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

use super::actor::EngineActor;
use super::command::{Command, PairingStart, Reply};
use crate::error::{Result, SlideshowError};
use crate::pairing::PairingStatus;
use crate::registry::{Device, DeviceRegistry, ReconnectPolicy};
use crate::state::{EventBus, SlideshowEvent, StatusSnapshot};
use crate::store::SessionStore;
use crate::streaming::{
    ContentServer, FanOut, ImageOutput, ImagePreparer, PushPolicy, TransitionRenderer, VideoOutput,
};
use crate::transport::DeviceTransport;
use crate::types::{EngineConfig, SlideshowConfig};

const COMMAND_QUEUE: usize = 64;

/// Async control surface of a running engine
///
/// Cheap to clone. Every method is a request to the engine task and
/// returns once the engine has answered; the handle itself holds no state
/// besides channels.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: EventBus,
    status: watch::Receiver<StatusSnapshot>,
}

impl EngineHandle {
    /// Bind the content server and start the engine task
    ///
    /// Known devices from `store` are restored into the registry as
    /// discovered, ready to connect.
    ///
    /// # Errors
    ///
    /// Returns an error if the content server cannot bind.
    pub async fn spawn(
        config: EngineConfig,
        transport: Arc<dyn DeviceTransport>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let server = Arc::new(
            ContentServer::bind(config.content_bind, config.public_host, config.content_ttl).await?,
        );
        let events = EventBus::new(config.event_capacity);

        let preparer = ImagePreparer::new(
            ImageOutput::from_config(&config),
            config.content_cache_entries,
        );
        let renderer = TransitionRenderer::new(VideoOutput::from_config(&config), preparer.clone());
        let fan_out = FanOut::new(
            preparer,
            renderer,
            server,
            PushPolicy::from_config(&config),
            config.max_devices,
            events.clone(),
        );

        let mut registry = DeviceRegistry::new(ReconnectPolicy::from_config(&config));
        match store.load_devices().await {
            Ok(known) => registry.restore_known(known),
            Err(e) => tracing::warn!("Cannot load known devices: {}", e),
        }

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let actor = EngineActor::new(
            config,
            transport,
            store,
            registry,
            fan_out,
            events.clone(),
            rx,
        );
        let status = actor.status_receiver();
        tokio::spawn(actor.run());

        Ok(Self {
            commands: tx,
            events,
            status,
        })
    }

    #[cfg(test)]
    pub(super) fn from_parts(
        commands: mpsc::Sender<Command>,
        events: EventBus,
        status: watch::Receiver<StatusSnapshot>,
    ) -> Self {
        Self {
            commands,
            events,
            status,
        }
    }

    /// Queue a command and wait for its answer
    ///
    /// A command is handed to the queue before the first await point, so a
    /// caller that stops waiting (a timed-out bridge call) never withdraws it.
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        match self.commands.try_send(command(tx)) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    if commands.send(command).await.is_err() {
                        tracing::debug!("Engine closed before a queued command was delivered");
                    }
                });
            }
            Err(TrySendError::Closed(_)) => return Err(SlideshowError::EngineClosed),
        }
        rx.await.map_err(|_| SlideshowError::EngineClosed)?
    }

    // ===== Devices =====

    /// Browse the network and merge what was found into the registry
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    pub async fn discover(&self) -> Result<Vec<Device>> {
        self.request(Command::Discover).await
    }

    /// Every known device
    ///
    /// # Errors
    ///
    /// `EngineClosed` after shutdown.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.request(Command::Devices).await
    }

    /// Connect a device, using stored credentials if any
    ///
    /// # Errors
    ///
    /// `AuthorizationRequired` when the device wants pairing first; network
    /// and timeout errors otherwise.
    pub async fn connect(&self, device_id: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        self.request(|reply| Command::Connect { device_id, reply })
            .await
    }

    /// Disconnect a device and drop its content URLs
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` for unknown devices.
    pub async fn disconnect(&self, device_id: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        self.request(|reply| Command::Disconnect { device_id, reply })
            .await
    }

    // ===== Pairing =====

    /// Open a pairing session
    ///
    /// # Errors
    ///
    /// `Conflict` if one is already open for the device, `Capability` if the
    /// device cannot pair.
    pub async fn start_pairing(&self, device_id: impl Into<String>) -> Result<PairingStart> {
        let device_id = device_id.into();
        self.request(|reply| Command::StartPairing { device_id, reply })
            .await
    }

    /// Submit the PIN for an open pairing session
    ///
    /// # Errors
    ///
    /// `Validation` for malformed PINs, `PairingFailed` for rejected ones.
    pub async fn submit_pin(&self, device_id: impl Into<String>, pin: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        let pin = pin.into();
        self.request(|reply| Command::SubmitPin {
            device_id,
            pin,
            reply,
        })
        .await
    }

    /// Abandon a pairing session; a no-op when none is open
    ///
    /// # Errors
    ///
    /// `InvalidState` while the PIN is being verified.
    pub async fn cancel_pairing(&self, device_id: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        self.request(|reply| Command::CancelPairing { device_id, reply })
            .await
    }

    /// Progress of the device's pairing session
    ///
    /// # Errors
    ///
    /// `EngineClosed` after shutdown.
    pub async fn pairing_status(&self, device_id: impl Into<String>) -> Result<Option<PairingStatus>> {
        let device_id = device_id.into();
        self.request(|reply| Command::PairingStatus { device_id, reply })
            .await
    }

    // ===== Slideshow =====

    /// Load images and apply a configuration; only while stopped
    ///
    /// # Errors
    ///
    /// `Validation` for bad values or an empty directory, `InvalidState`
    /// while running, `DeviceNotFound` for unknown devices.
    pub async fn configure(&self, config: SlideshowConfig) -> Result<()> {
        self.request(|reply| Command::Configure { config, reply })
            .await
    }

    /// Re-apply the last persisted configuration
    ///
    /// Returns `false` when nothing was persisted.
    ///
    /// # Errors
    ///
    /// Same as [`configure`](Self::configure), plus storage errors.
    pub async fn restore_last_session(&self) -> Result<bool> {
        self.request(Command::RestoreLastSession).await
    }

    /// Start the timed slideshow from the current position
    ///
    /// # Errors
    ///
    /// `Validation` if not configured, `InvalidState` if already running.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Stop the slideshow; idempotent
    ///
    /// # Errors
    ///
    /// `EngineClosed` after shutdown.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Advance one step now
    ///
    /// # Errors
    ///
    /// `InvalidState` unless running.
    pub async fn next(&self) -> Result<()> {
        self.request(Command::Next).await
    }

    /// Go back one step now
    ///
    /// # Errors
    ///
    /// `InvalidState` unless running.
    pub async fn previous(&self) -> Result<()> {
        self.request(Command::Previous).await
    }

    /// Change seconds per step
    ///
    /// # Errors
    ///
    /// `Validation` for zero or above one day, `InvalidState` if not configured.
    pub async fn update_display_time(&self, seconds: u64) -> Result<()> {
        self.request(|reply| Command::UpdateDisplayTime { seconds, reply })
            .await
    }

    /// Current status, as computed by the engine
    ///
    /// # Errors
    ///
    /// `EngineClosed` after shutdown.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.request(Command::Status).await
    }

    /// Last published status, without a round trip
    #[must_use]
    pub fn latest_status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Status change notifications
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SlideshowEvent> {
        self.events.subscribe()
    }

    /// Stop the slideshow, close devices and the content server, end the task
    ///
    /// # Errors
    ///
    /// `EngineClosed` if the engine already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    /// Whether the engine task is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
