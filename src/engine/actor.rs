//! The engine task
//!
//! One task owns the registry, the pairing manager and the slideshow
//! session. Handles talk to it through [`Command`]s; I/O runs in spawned
//! tasks that report back through [`Internal`] messages, so no state is
//! shared and nothing here is locked.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::command::{Command, ConfigReply, Internal, PairingStart, Reply};
use crate::error::{ErrorKind, Result, SlideshowError};
use crate::pairing::{Opened, PairingManager, PinCheck, Verified, VerifyResult};
use crate::registry::{ConnectResolution, ConnectStart, Device, DeviceRegistry};
use crate::slideshow::{SlideshowSession, StepPlan, StepTally, load_images, validate_config};
use crate::state::{DisplayedImage, EventBus, SlideshowEvent, StatusContainer, StatusSnapshot};
use crate::store::SessionStore;
use crate::streaming::{
    ContentRequest, ContentServer, CrossfadeJob, Delivery, DeliveryOutcome, FanOut, display_name,
};
use crate::transport::{DeviceLink, DeviceTransport, PairingHandle};
use crate::types::{Credentials, DeviceInfo, EngineConfig, PairingRequirement, SlideshowConfig};

struct InFlight {
    sequence: u64,
    cancel: CancellationToken,
}

pub(crate) struct EngineActor {
    config: Arc<EngineConfig>,
    transport: Arc<dyn DeviceTransport>,
    store: Arc<dyn SessionStore>,
    registry: DeviceRegistry,
    pairing: PairingManager,
    session: SlideshowSession,
    fan_out: FanOut,
    events: EventBus,
    status: StatusContainer,
    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    in_flight: Option<InFlight>,
    sequence: u64,
}

impl EngineActor {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        transport: Arc<dyn DeviceTransport>,
        store: Arc<dyn SessionStore>,
        registry: DeviceRegistry,
        fan_out: FanOut,
        events: EventBus,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            pairing: PairingManager::new(config.pairing_timeout, config.max_pin_attempts),
            session: SlideshowSession::new(config.max_devices),
            config,
            transport,
            store,
            registry,
            fan_out,
            events,
            status: StatusContainer::new(),
            commands,
            internal_tx,
            internal_rx,
            in_flight: None,
            sequence: 0,
        }
    }

    pub(crate) fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub(crate) async fn run(mut self) {
        let period = self.config.health_check_interval.max(Duration::from_millis(10));
        let mut health = tokio::time::interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Engine started");
        self.settle();

        loop {
            let wakeup = self.next_wakeup();
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown().await;
                        break;
                    };
                    if let ControlFlow::Break(reply) = self.handle_command(command) {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                }
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                _ = health.tick() => self.check_health(),
                _ = housekeeping.tick() => self.housekeeping(),
                () = sleep_until_opt(wakeup) => self.on_wakeup(Instant::now()),
            }
            self.settle();
        }

        tracing::info!("Engine stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<Reply<()>> {
        match command {
            Command::Discover(reply) => self.discover(reply),
            Command::Devices(reply) => {
                let _ = reply.send(Ok(self.registry.devices()));
            }
            Command::Connect { device_id, reply } => self.connect(&device_id, reply),
            Command::Disconnect { device_id, reply } => {
                let _ = reply.send(self.disconnect(&device_id));
            }
            Command::StartPairing { device_id, reply } => self.start_pairing(&device_id, Some(reply)),
            Command::SubmitPin {
                device_id,
                pin,
                reply,
            } => self.submit_pin(&device_id, pin, reply),
            Command::CancelPairing { device_id, reply } => {
                let _ = reply.send(self.cancel_pairing(&device_id));
            }
            Command::PairingStatus { device_id, reply } => {
                let _ = reply.send(Ok(self.pairing.status(&device_id)));
            }
            Command::Configure { config, reply } => {
                self.configure(config, ConfigReply::Configure(reply));
            }
            Command::RestoreLastSession(reply) => self.restore_last_session(reply),
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::Stop(reply) => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            Command::Next(reply) => {
                let _ = reply.send(self.navigate(true));
            }
            Command::Previous(reply) => {
                let _ = reply.send(self.navigate(false));
            }
            Command::UpdateDisplayTime { seconds, reply } => {
                let _ = reply.send(self.update_display_time(seconds));
            }
            Command::Status(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            Command::Shutdown(reply) => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Discovered { result, reply } => self.on_discovered(result, reply),
            Internal::Connected {
                device_id,
                result,
                reply,
            } => self.on_connected(&device_id, result, reply),
            Internal::PairingOpened {
                device_id,
                generation,
                result,
                reply,
            } => self.on_pairing_opened(&device_id, generation, result, reply),
            Internal::PinVerified {
                device_id,
                generation,
                handle,
                result,
                reply,
            } => self.on_pin_verified(&device_id, generation, handle, result, reply),
            Internal::ImagesLoaded {
                config,
                result,
                reply,
            } => self.on_images_loaded(config, result, reply),
            Internal::SessionLoaded { config, reply } => {
                self.configure(config, ConfigReply::Restore(reply));
            }
            Internal::StepDone {
                sequence,
                step,
                outcomes,
            } => self.on_step_done(sequence, step, outcomes),
            Internal::Pinged { device_id, result } => self.on_pinged(&device_id, result),
        }
    }

    // ===== Devices =====

    fn discover(&self, reply: Reply<Vec<Device>>) {
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.discovery_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = transport.discover(timeout).await;
            let _ = tx.send(Internal::Discovered { result, reply });
        });
    }

    fn on_discovered(&mut self, result: Result<Vec<DeviceInfo>>, reply: Reply<Vec<Device>>) {
        match result {
            Ok(found) => {
                tracing::info!("Discovery found {} devices", found.len());
                let updated = self.registry.merge_discovered(found);
                self.persist_devices(updated, self.registry.devices(), reply);
            }
            Err(e) => {
                tracing::warn!("Discovery failed: {}", e);
                self.events.emit(SlideshowEvent::error(None, &e));
                let _ = reply.send(Err(e));
            }
        }
    }

    fn connect(&mut self, device_id: &str, reply: Reply<()>) {
        match self.registry.begin_connect(device_id) {
            Ok(ConnectStart::AlreadyConnected) => {
                self.session.include(device_id);
                let _ = reply.send(Ok(()));
            }
            Ok(ConnectStart::Started(info)) => {
                self.session.include(device_id);
                self.spawn_connect(info, Some(reply));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn spawn_connect(&self, info: DeviceInfo, reply: Option<Reply<()>>) {
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let timeout = self.config.connection_timeout;
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let credentials = match store.load_credentials(&info.id).await {
                Ok(credentials) => credentials,
                Err(e) => {
                    tracing::warn!("Cannot load credentials for {}: {}", info.id, e);
                    None
                }
            };
            let result = match tokio::time::timeout(
                timeout,
                transport.connect(&info, credentials.as_ref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SlideshowError::Timeout {
                    device_id: info.id.clone(),
                    duration: timeout,
                }),
            };
            let _ = tx.send(Internal::Connected {
                device_id: info.id,
                result: result.map(|link| (link, credentials)),
                reply,
            });
        });
    }

    fn on_connected(
        &mut self,
        device_id: &str,
        result: Result<(Arc<dyn DeviceLink>, Option<Credentials>)>,
        reply: Option<Reply<()>>,
    ) {
        let outcome = match self.registry.complete_connect(device_id, result) {
            ConnectResolution::Connected => Ok(()),
            ConnectResolution::PairingRequired(e) => {
                self.pairing_needed(device_id);
                Err(e)
            }
            ConnectResolution::Failed(e) | ConnectResolution::GaveUp(e) => {
                self.events.emit(SlideshowEvent::error(Some(device_id), &e));
                Err(e)
            }
            ConnectResolution::RetryScheduled {
                attempt,
                delay,
                error,
            } => {
                tracing::debug!(device_id, attempt, "Reconnect scheduled in {:?}", delay);
                Err(error)
            }
            ConnectResolution::Stale(link) => {
                if let Some(link) = link {
                    close_link(link);
                }
                Err(SlideshowError::Conflict {
                    message: format!("connection attempt to {device_id} was superseded"),
                })
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn disconnect(&mut self, device_id: &str) -> Result<()> {
        let link = self.registry.disconnect(device_id)?;
        if let Some(link) = link {
            close_link(link);
        }
        if let Ok(Some(Some(handle))) = self.pairing.cancel(device_id) {
            close_handle(handle);
        }

        let server = Arc::clone(self.fan_out.server());
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            server.invalidate_device(&device_id).await;
        });
        Ok(())
    }

    fn check_health(&self) {
        let timeout = self.config.connection_timeout;
        for (device_id, link) in self.registry.connected_links() {
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                let result = match tokio::time::timeout(timeout, link.ping()).await {
                    Ok(result) => result,
                    Err(_) => Err(SlideshowError::Timeout {
                        device_id: device_id.clone(),
                        duration: timeout,
                    }),
                };
                let _ = tx.send(Internal::Pinged { device_id, result });
            });
        }
    }

    fn on_pinged(&mut self, device_id: &str, result: Result<()>) {
        let Err(e) = result else {
            return;
        };
        if !self.registry.is_connected(device_id) {
            return;
        }

        tracing::warn!("Health check of {} failed: {}", device_id, e);
        self.events.emit(SlideshowEvent::error(Some(device_id), &e));
        if e.requires_pairing() {
            if let Some(link) = self.registry.mark_pairing_required(device_id, &e) {
                close_link(link);
            }
            self.pairing_needed(device_id);
        } else if let Some(link) = self.registry.mark_lost(device_id, &e) {
            close_link(link);
        }
    }

    /// Save updated devices, then answer with the registry view
    fn persist_devices(&self, updated: Vec<DeviceInfo>, devices: Vec<Device>, reply: Reply<Vec<Device>>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for device in updated {
                if let Err(e) = store.save_device(&device).await {
                    tracing::warn!("Cannot save device {}: {}", device.id, e);
                }
            }
            let _ = reply.send(Ok(devices));
        });
    }

    // ===== Pairing =====

    /// Device demands pairing: announce it and, when it is part of the
    /// running slideshow, exclude it and open a pairing session
    fn pairing_needed(&mut self, device_id: &str) {
        let name = self
            .registry
            .get(device_id)
            .map_or_else(|| device_id.to_string(), |d| d.info.name.clone());
        self.events.emit(SlideshowEvent::AuthenticationRequired {
            device_id: device_id.to_string(),
            name,
        });

        if self.session.is_running() && self.session.is_selected(device_id) {
            self.session.exclude(device_id);
            if !self.pairing.is_active(device_id) {
                tracing::info!("Starting pairing for {} automatically", device_id);
                self.start_pairing(device_id, None);
            }
        }
    }

    fn start_pairing(&mut self, device_id: &str, reply: Option<Reply<PairingStart>>) {
        let (info, generation) = match self.open_pairing(device_id) {
            Ok(opened) => opened,
            Err(e) => {
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(e));
                    }
                    None => self.events.emit(SlideshowEvent::error(Some(device_id), &e)),
                }
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let timeout = self.config.connection_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.begin_pairing(&info)).await {
                Ok(result) => result,
                Err(_) => Err(SlideshowError::Timeout {
                    device_id: info.id.clone(),
                    duration: timeout,
                }),
            };
            let _ = tx.send(Internal::PairingOpened {
                device_id: info.id,
                generation,
                result,
                reply,
            });
        });
    }

    fn open_pairing(&mut self, device_id: &str) -> Result<(DeviceInfo, u64)> {
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| SlideshowError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        if device.info.pairing == PairingRequirement::Unsupported {
            return Err(SlideshowError::Capability {
                device_id: device_id.to_string(),
                capability: "pairing".to_string(),
            });
        }
        if self.pairing.is_active(device_id) {
            return Err(SlideshowError::Conflict {
                message: format!("pairing already in progress for {device_id}"),
            });
        }

        let info = self.registry.begin_pairing(device_id)?;
        match self.pairing.start(device_id) {
            Ok(generation) => Ok((info, generation)),
            Err(e) => {
                self.registry.abort_pairing(device_id, true, None);
                Err(e)
            }
        }
    }

    fn on_pairing_opened(
        &mut self,
        device_id: &str,
        generation: u64,
        result: Result<Box<dyn PairingHandle>>,
        reply: Option<Reply<PairingStart>>,
    ) {
        let outcome = match result {
            Ok(handle) => match self.pairing.opened(device_id, generation, handle) {
                Opened::AwaitingPin { direction, pin } => {
                    self.events.emit(SlideshowEvent::PairingStarted {
                        device_id: device_id.to_string(),
                        direction,
                        pin: pin.clone(),
                    });
                    Ok(PairingStart { direction, pin })
                }
                Opened::Discard(handle) => {
                    close_handle(handle);
                    Err(SlideshowError::invalid_state(
                        format!("pairing with {device_id} ended before the device answered"),
                        self.pairing.phase(device_id),
                    ))
                }
            },
            Err(e) => {
                if self.pairing.open_failed(device_id, generation) {
                    self.registry
                        .abort_pairing(device_id, false, Some(&e.to_string()));
                }
                tracing::warn!("Device {} could not start pairing: {}", device_id, e);
                self.events.emit(SlideshowEvent::error(Some(device_id), &e));
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn submit_pin(&mut self, device_id: &str, pin: String, reply: Reply<()>) {
        let check = match self.pairing.submit_pin(device_id, &pin) {
            Ok(check) => check,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        match check {
            PinCheck::Verify { generation, handle } => {
                self.spawn_verify(device_id, pin, generation, handle, reply);
            }
            PinCheck::Mismatch { attempts } => {
                let _ = reply.send(Err(SlideshowError::PairingFailed {
                    device_id: device_id.to_string(),
                    message: format!("incorrect PIN (attempt {attempts})"),
                }));
            }
            PinCheck::Exhausted(handle) => {
                if let Some(handle) = handle {
                    close_handle(handle);
                }
                let error = SlideshowError::PairingFailed {
                    device_id: device_id.to_string(),
                    message: "too many incorrect PINs".to_string(),
                };
                self.pairing_failed(device_id, &error);
                let _ = reply.send(Err(error));
            }
        }
    }

    fn spawn_verify(
        &mut self,
        device_id: &str,
        pin: String,
        generation: u64,
        handle: Box<dyn PairingHandle>,
        reply: Reply<()>,
    ) {
        let Some(info) = self.registry.get(device_id).map(|d| d.info.clone()) else {
            let error = SlideshowError::DeviceNotFound {
                device_id: device_id.to_string(),
            };
            if let Verified::Failed(handle, _) | Verified::Stale(handle) | Verified::Paired(handle) =
                self.pairing
                    .verify_finished(device_id, generation, handle, VerifyResult::Failed(error))
            {
                close_handle(handle);
            }
            let _ = reply.send(Err(SlideshowError::DeviceNotFound {
                device_id: device_id.to_string(),
            }));
            return;
        };

        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let timeout = self.config.connection_timeout;
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let mut handle = handle;
            let timed_out = || SlideshowError::Timeout {
                device_id: info.id.clone(),
                duration: timeout,
            };

            let result = async {
                let credentials = tokio::time::timeout(timeout, handle.finish(&pin))
                    .await
                    .map_err(|_| timed_out())??;
                store.save_credentials(&info.id, &credentials).await?;
                let link = tokio::time::timeout(timeout, transport.connect(&info, Some(&credentials)))
                    .await
                    .map_err(|_| timed_out())??;
                Ok::<_, SlideshowError>((credentials, link))
            }
            .await;

            let _ = tx.send(Internal::PinVerified {
                device_id: info.id.clone(),
                generation,
                handle,
                result,
                reply,
            });
        });
    }

    fn on_pin_verified(
        &mut self,
        device_id: &str,
        generation: u64,
        handle: Box<dyn PairingHandle>,
        result: Result<(Credentials, Arc<dyn DeviceLink>)>,
        reply: Reply<()>,
    ) {
        let outcome = match result {
            Ok((credentials, link)) => {
                match self
                    .pairing
                    .verify_finished(device_id, generation, handle, VerifyResult::Succeeded)
                {
                    Verified::Paired(handle) => {
                        close_handle(handle);
                        if self
                            .registry
                            .finish_pairing(device_id, Arc::clone(&link), credentials)
                        {
                            self.session.include(device_id);
                            Ok(())
                        } else {
                            close_link(link);
                            Err(self.pairing_gone(device_id))
                        }
                    }
                    Verified::Failed(handle, _) | Verified::Stale(handle) => {
                        close_handle(handle);
                        close_link(link);
                        Err(self.pairing_gone(device_id))
                    }
                    Verified::Retry { error, .. } => {
                        close_link(link);
                        Err(error)
                    }
                }
            }
            Err(e) => {
                let verdict = if matches!(e, SlideshowError::PairingFailed { .. }) {
                    VerifyResult::Rejected(e)
                } else {
                    VerifyResult::Failed(e)
                };
                match self
                    .pairing
                    .verify_finished(device_id, generation, handle, verdict)
                {
                    Verified::Retry { attempts, error } => {
                        tracing::warn!("Device {} rejected PIN (attempt {})", device_id, attempts);
                        Err(error)
                    }
                    Verified::Failed(handle, error) => {
                        close_handle(handle);
                        self.pairing_failed(device_id, &error);
                        Err(error)
                    }
                    Verified::Paired(handle) | Verified::Stale(handle) => {
                        close_handle(handle);
                        Err(self.pairing_gone(device_id))
                    }
                }
            }
        };

        let _ = reply.send(outcome);
    }

    fn cancel_pairing(&mut self, device_id: &str) -> Result<()> {
        let Some(handle) = self.pairing.cancel(device_id)? else {
            return Ok(());
        };
        if let Some(handle) = handle {
            close_handle(handle);
        }
        self.registry.abort_pairing(device_id, true, None);
        Ok(())
    }

    fn pairing_failed(&mut self, device_id: &str, error: &SlideshowError) {
        self.registry
            .abort_pairing(device_id, false, Some(&error.to_string()));
        self.events.emit(SlideshowEvent::error(Some(device_id), error));
    }

    fn pairing_gone(&self, device_id: &str) -> SlideshowError {
        SlideshowError::invalid_state(
            format!("pairing session for {device_id} ended meanwhile"),
            self.registry.state(device_id),
        )
    }

    // ===== Slideshow =====

    fn active_devices(&self) -> Vec<String> {
        let registry = &self.registry;
        self.session.active_devices(|id| registry.is_connected(id))
    }

    fn configure(&mut self, config: SlideshowConfig, reply: ConfigReply) {
        if let Err(e) = self.check_config(&config) {
            reply.send(Err(e));
            return;
        }

        let extensions = self.config.image_extensions.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = load_images(&config.images_directory, &extensions).await;
            let _ = tx.send(Internal::ImagesLoaded {
                config,
                result,
                reply,
            });
        });
    }

    fn check_config(&self, config: &SlideshowConfig) -> Result<()> {
        if self.session.is_running() {
            return Err(SlideshowError::invalid_state(
                "cannot reconfigure a running slideshow",
                self.session.state(),
            ));
        }
        validate_config(config, self.config.max_devices)?;
        if let Some(unknown) = config.devices.iter().find(|id| !self.registry.contains(id)) {
            return Err(SlideshowError::DeviceNotFound {
                device_id: unknown.clone(),
            });
        }
        Ok(())
    }

    fn on_images_loaded(
        &mut self,
        config: SlideshowConfig,
        result: Result<Vec<std::path::PathBuf>>,
        reply: ConfigReply,
    ) {
        let configured = result.and_then(|images| {
            let count = images.len();
            self.session.configure(config.clone(), images).map(|()| count)
        });

        match configured {
            Ok(images_count) => {
                self.events.emit(SlideshowEvent::ConfigurationUpdated {
                    config: config.clone(),
                    images_count,
                });
                self.persist_config(config, reply);
            }
            Err(e) => {
                tracing::warn!("Configuration rejected: {}", e);
                self.events.emit(SlideshowEvent::error(None, &e));
                reply.send(Err(e));
            }
        }
    }

    /// Save the applied configuration, then answer
    ///
    /// A storage failure is logged; the configuration stays applied.
    fn persist_config(&self, config: SlideshowConfig, reply: ConfigReply) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.save_session_config(&config).await {
                tracing::warn!("Cannot save session configuration: {}", e);
            }
            reply.send(Ok(()));
        });
    }

    fn restore_last_session(&self, reply: Reply<bool>) {
        let store = Arc::clone(&self.store);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match store.load_last_session_config().await {
                Ok(Some(config)) => {
                    let _ = tx.send(Internal::SessionLoaded { config, reply });
                }
                Ok(None) => {
                    let _ = reply.send(Ok(false));
                }
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            }
        });
    }

    fn start(&mut self) -> Result<()> {
        let active = self.active_devices();
        let plan = self.session.start(&active)?;
        if active.is_empty() {
            tracing::warn!("Slideshow started with no connected device");
        }
        if let Some(config) = self.session.config() {
            self.events.emit(SlideshowEvent::SlideshowStarted {
                config: config.clone(),
                active_devices: active,
                timestamp: Utc::now(),
            });
        }
        self.launch_step(plan);
        Ok(())
    }

    /// Stop the run; returns the links of selected devices to stop
    fn halt(&mut self) -> Vec<(String, Arc<dyn DeviceLink>)> {
        let Some(stats) = self.session.stop() else {
            return Vec::new();
        };
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
        }
        self.events.emit(SlideshowEvent::SlideshowStopped {
            stats,
            timestamp: Utc::now(),
        });

        self.registry
            .connected_links()
            .into_iter()
            .filter(|(id, _)| self.session.is_selected(id))
            .collect()
    }

    fn stop(&mut self) {
        if !self.session.is_running() {
            return;
        }
        let links = self.halt();
        let server = Arc::clone(self.fan_out.server());
        tokio::spawn(stop_devices(server, links));
    }

    fn navigate(&mut self, forward: bool) -> Result<()> {
        let active = self.active_devices();
        let plan = if forward {
            self.session.next(&active)?
        } else {
            self.session.previous(&active)?
        };
        if let Some(plan) = plan {
            self.launch_step(plan);
        }
        Ok(())
    }

    fn update_display_time(&mut self, seconds: u64) -> Result<()> {
        self.session.update_display_time(seconds, Instant::now())?;
        self.events.emit(SlideshowEvent::DisplayTimeUpdated {
            display_time: seconds,
        });
        Ok(())
    }

    fn launch_step(&mut self, plan: StepPlan) {
        self.sequence += 1;
        let sequence = self.sequence;
        let step = plan.step;

        if let Some(cycles) = plan.cycle_completed {
            tracing::info!("Cycle {} completed", cycles);
            self.events.emit(SlideshowEvent::CycleCompleted {
                cycles,
                timestamp: Utc::now(),
            });
        }

        let deliveries: Vec<Delivery> = plan
            .assignments
            .iter()
            .filter_map(|assignment| {
                let link = self.registry.link(&assignment.device_id)?;
                let device = self.registry.get(&assignment.device_id)?;
                let content = match plan.clip {
                    Some(clip) => ContentRequest::Transition(CrossfadeJob {
                        from: assignment.previous.clone(),
                        to: assignment.image.clone(),
                        transition: clip.transition,
                        hold: clip.hold,
                    }),
                    None => ContentRequest::Image(assignment.image.clone()),
                };
                Some(Delivery {
                    device_id: assignment.device_id.clone(),
                    device_addr: device.info.address,
                    link,
                    content,
                })
            })
            .collect();

        if deliveries.is_empty() {
            tracing::warn!(step, "No active device to display on");
        } else {
            tracing::info!(step, devices = deliveries.len(), "Displaying step");
        }

        let cancel = CancellationToken::new();
        if let Some(previous) = self.in_flight.replace(InFlight {
            sequence,
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
        }

        let fan_out = self.fan_out.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            fan_out.server().invalidate_before(sequence).await;
            let outcomes = fan_out.fan_out(sequence, deliveries, cancel).await;
            let _ = tx.send(Internal::StepDone {
                sequence,
                step,
                outcomes,
            });
        });
    }

    fn on_step_done(&mut self, sequence: u64, step: u64, outcomes: Vec<DeliveryOutcome>) {
        if self.in_flight.as_ref().map(|f| f.sequence) != Some(sequence) {
            tracing::debug!(step, "Dropping outcomes of a superseded step");
            return;
        }
        self.in_flight = None;

        let mut tally = StepTally::default();
        let mut distribution = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let image = display_name(&outcome.image);
            match outcome.result {
                Ok(_) => {
                    tally.delivered += 1;
                    distribution.push(DisplayedImage {
                        device_id: outcome.device_id,
                        image,
                        delivered: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tally.failed += 1;
                    self.delivery_failed(&outcome.device_id, &e);
                    distribution.push(DisplayedImage {
                        device_id: outcome.device_id,
                        image,
                        delivered: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let active = self.active_devices();
        let Some(finished) = self
            .session
            .finish_step(step, tally, Instant::now(), &active)
        else {
            return;
        };

        self.events.emit(SlideshowEvent::ImagesDisplayed {
            step,
            distribution,
            stats: finished.stats,
            timestamp: Utc::now(),
        });
        if let Some(plan) = finished.follow_up {
            self.launch_step(plan);
        }
    }

    /// Apply one device's delivery failure without touching the others
    fn delivery_failed(&mut self, device_id: &str, error: &SlideshowError) {
        tracing::warn!(device_id, kind = ?error.kind(), "Delivery failed: {}", error);
        self.events.emit(SlideshowEvent::error(Some(device_id), error));

        match error.kind() {
            ErrorKind::Authorization => {
                if let Some(link) = self.registry.mark_pairing_required(device_id, error) {
                    close_link(link);
                }
                self.pairing_needed(device_id);
            }
            ErrorKind::Capability => {
                self.session.exclude(device_id);
            }
            ErrorKind::TransientNetwork => {
                if let Some(link) = self.registry.mark_lost(device_id, error) {
                    close_link(link);
                }
            }
            _ => {}
        }
    }

    // ===== Timers =====

    fn next_wakeup(&self) -> Option<Instant> {
        [
            self.session.deadline(),
            self.registry.next_reconnect_due(),
            self.pairing.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_wakeup(&mut self, now: Instant) {
        for (device_id, handle) in self.pairing.expire(now) {
            if let Some(handle) = handle {
                close_handle(handle);
            }
            let error = SlideshowError::PairingFailed {
                device_id: device_id.clone(),
                message: "pairing session timed out".to_string(),
            };
            self.pairing_failed(&device_id, &error);
        }

        for (info, attempt) in self.registry.take_due_reconnects(now) {
            tracing::debug!(device_id = %info.id, attempt, "Running reconnect");
            self.spawn_connect(info, None);
        }

        let active = self.active_devices();
        if let Some(plan) = self.session.tick(now, &active) {
            self.launch_step(plan);
        }
    }

    fn housekeeping(&self) {
        let server = Arc::clone(self.fan_out.server());
        tokio::spawn(async move {
            let purged = server.purge_expired().await;
            if purged > 0 {
                tracing::trace!("Purged {} expired content URLs", purged);
            }
        });
    }

    // ===== Status =====

    fn settle(&mut self) {
        for change in self.registry.take_changes() {
            self.events.emit(SlideshowEvent::DeviceStateChanged {
                device_id: change.device_id,
                old: change.old,
                new: change.new,
            });
        }
        self.status.publish(self.snapshot());
    }

    fn snapshot(&self) -> StatusSnapshot {
        let config = self.session.config().cloned();
        StatusSnapshot {
            state: self.session.state(),
            is_running: self.session.is_running(),
            images_directory: config.as_ref().map(|c| c.images_directory.clone()),
            images_count: self.session.images().len(),
            active_devices: self.active_devices(),
            connected_devices: self.registry.connected_ids(),
            display_time: config.as_ref().map(|c| c.display_time),
            video_mode: config.as_ref().is_some_and(|c| c.video_mode),
            transition_duration: config
                .as_ref()
                .filter(|c| c.video_mode)
                .map(|c| c.transition_duration),
            current_step: self.session.step(),
            stats: self.session.stats().clone(),
            config,
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Engine shutting down");
        let links = self.halt();
        stop_devices(Arc::clone(self.fan_out.server()), links).await;

        for mut handle in self.pairing.drain() {
            handle.close().await;
        }
        join_all(self.registry.drain_links().into_iter().map(|link| async move {
            link.close().await;
        }))
        .await;

        self.fan_out.server().shutdown();
        self.settle();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn stop_devices(server: Arc<ContentServer>, links: Vec<(String, Arc<dyn DeviceLink>)>) {
    server.invalidate_all().await;
    join_all(links.into_iter().map(|(device_id, link)| async move {
        if let Err(e) = link.stop().await {
            tracing::debug!("Stop on {} failed: {}", device_id, e);
        }
    }))
    .await;
}

fn close_link(link: Arc<dyn DeviceLink>) {
    tokio::spawn(async move {
        link.close().await;
    });
}

fn close_handle(mut handle: Box<dyn PairingHandle>) {
    tokio::spawn(async move {
        handle.close().await;
    });
}
