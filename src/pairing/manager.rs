use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::pin::{generate_pin, validate_pin};
use super::session::{PairingPhase, PairingSession, PairingStatus};
use crate::error::{Result, SlideshowError};
use crate::transport::{PairingHandle, PinDirection};

struct ActiveSession {
    generation: u64,
    phase: PairingPhase,
    session: PairingSession,
    handle: Option<Box<dyn PairingHandle>>,
    deadline: Instant,
}

/// Result of attaching the device's pairing handle
pub enum Opened {
    /// Session now waits for a PIN
    AwaitingPin {
        /// Who shows the PIN
        direction: PinDirection,
        /// PIN generated for the user to enter on the device
        pin: Option<String>,
    },
    /// Session is gone; close the handle
    Discard(Box<dyn PairingHandle>),
}

/// Result of [`PairingManager::submit_pin`]
pub enum PinCheck {
    /// Send the PIN to the device
    Verify {
        /// Session generation to report back with
        generation: u64,
        /// Device-side exchange
        handle: Box<dyn PairingHandle>,
    },
    /// Controller-generated PIN did not match
    Mismatch {
        /// Rejected submissions so far
        attempts: u32,
    },
    /// Mismatch used up the last attempt; session failed
    Exhausted(Option<Box<dyn PairingHandle>>),
}

/// How the device answered a PIN
pub enum VerifyResult {
    /// Credentials stored and link established
    Succeeded,
    /// Device rejected the PIN
    Rejected(SlideshowError),
    /// Exchange broke down
    Failed(SlideshowError),
}

/// Result of [`PairingManager::verify_finished`]
pub enum Verified {
    /// Session completed; close the handle
    Paired(Box<dyn PairingHandle>),
    /// PIN rejected; another submission is allowed
    Retry {
        /// Rejected submissions so far
        attempts: u32,
        /// Reason given by the device
        error: SlideshowError,
    },
    /// Session failed; close the handle
    Failed(Box<dyn PairingHandle>, SlideshowError),
    /// Session was cancelled or expired meanwhile; close the handle
    Stale(Box<dyn PairingHandle>),
}

/// PIN-exchange state machine, one session per device
pub struct PairingManager {
    sessions: HashMap<String, ActiveSession>,
    /// Outcome of each device's last session, until the next start
    finished: HashMap<String, PairingStatus>,
    timeout: Duration,
    max_attempts: u32,
    next_generation: u64,
}

impl PairingManager {
    /// Create a manager with session lifetime and PIN attempt budget
    #[must_use]
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            sessions: HashMap::new(),
            finished: HashMap::new(),
            timeout,
            max_attempts: max_attempts.max(1),
            next_generation: 0,
        }
    }

    /// Check if a device has a session in progress
    #[must_use]
    pub fn is_active(&self, device_id: &str) -> bool {
        self.sessions.contains_key(device_id)
    }

    /// Phase of a device's session
    #[must_use]
    pub fn phase(&self, device_id: &str) -> PairingPhase {
        self.sessions
            .get(device_id)
            .map_or(PairingPhase::Idle, |s| s.phase)
    }

    /// Snapshot of a device's session
    ///
    /// Once a session ends its last state (`Paired`, `Failed` or
    /// `Cancelled`) stays visible until the next [`start`](Self::start).
    #[must_use]
    pub fn status(&self, device_id: &str) -> Option<PairingStatus> {
        self.sessions
            .get(device_id)
            .map(|s| PairingStatus {
                phase: s.phase,
                session: s.session.clone(),
            })
            .or_else(|| self.finished.get(device_id).cloned())
    }

    fn finish(&mut self, device_id: &str, phase: PairingPhase) -> Option<ActiveSession> {
        let active = self.sessions.remove(device_id)?;
        self.finished.insert(
            device_id.to_string(),
            PairingStatus {
                phase,
                session: active.session.clone(),
            },
        );
        Some(active)
    }

    /// Earliest session deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions.values().map(|s| s.deadline).min()
    }

    /// Open a session in `Started`
    ///
    /// Returns the generation the device answer must carry.
    ///
    /// # Errors
    ///
    /// `Conflict` if the device already has a session.
    pub fn start(&mut self, device_id: &str) -> Result<u64> {
        if self.is_active(device_id) {
            return Err(SlideshowError::Conflict {
                message: format!("pairing already in progress for {device_id}"),
            });
        }

        self.finished.remove(device_id);
        self.next_generation += 1;
        let generation = self.next_generation;
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::zero());

        self.sessions.insert(
            device_id.to_string(),
            ActiveSession {
                generation,
                phase: PairingPhase::Started,
                session: PairingSession {
                    device_id: device_id.to_string(),
                    direction: None,
                    generated_pin: None,
                    created_at,
                    expires_at,
                    attempts: 0,
                },
                handle: None,
                deadline: Instant::now() + self.timeout,
            },
        );
        tracing::info!("Pairing started for {}", device_id);
        Ok(generation)
    }

    /// Attach the device's pairing handle
    pub fn opened(
        &mut self,
        device_id: &str,
        generation: u64,
        handle: Box<dyn PairingHandle>,
    ) -> Opened {
        let Some(active) = self
            .sessions
            .get_mut(device_id)
            .filter(|s| s.generation == generation && s.phase == PairingPhase::Started)
        else {
            return Opened::Discard(handle);
        };

        let direction = handle.direction();
        let pin = match direction {
            PinDirection::ControllerProvidesPin => Some(generate_pin()),
            PinDirection::DeviceProvidesPin => None,
        };

        active.session.direction = Some(direction);
        active.session.generated_pin.clone_from(&pin);
        active.handle = Some(handle);
        active.phase = PairingPhase::AwaitingPin;
        tracing::debug!("Pairing with {} awaits PIN ({:?})", device_id, direction);

        Opened::AwaitingPin { direction, pin }
    }

    /// Device could not open the exchange
    ///
    /// Returns `true` if the session was still waiting for it.
    pub fn open_failed(&mut self, device_id: &str, generation: u64) -> bool {
        let matches = self
            .sessions
            .get(device_id)
            .is_some_and(|s| s.generation == generation && s.phase == PairingPhase::Started);
        if matches {
            self.finish(device_id, PairingPhase::Failed);
        }
        matches
    }

    /// Check a submitted PIN
    ///
    /// The format is validated before anything else.
    ///
    /// # Errors
    ///
    /// `Validation` for malformed PINs, `InvalidState` without a session
    /// waiting for a PIN, `Conflict` while a PIN is being verified.
    pub fn submit_pin(&mut self, device_id: &str, pin: &str) -> Result<PinCheck> {
        validate_pin(pin)?;

        let max_attempts = self.max_attempts;
        let Some(active) = self.sessions.get_mut(device_id) else {
            return Err(SlideshowError::invalid_state(
                format!("no pairing session for {device_id}"),
                PairingPhase::Idle,
            ));
        };

        match active.phase {
            PairingPhase::AwaitingPin => {}
            PairingPhase::Verifying => {
                return Err(SlideshowError::Conflict {
                    message: format!("PIN for {device_id} is already being verified"),
                });
            }
            phase => {
                return Err(SlideshowError::invalid_state(
                    format!("pairing session for {device_id} is not waiting for a PIN"),
                    phase,
                ));
            }
        }

        let mismatch = active
            .session
            .generated_pin
            .as_deref()
            .is_some_and(|expected| expected != pin);
        if mismatch {
            active.session.attempts += 1;
            let attempts = active.session.attempts;
            tracing::warn!(
                "Wrong PIN for {} (attempt {} of {})",
                device_id,
                attempts,
                max_attempts
            );
            if attempts >= max_attempts {
                let handle = self
                    .finish(device_id, PairingPhase::Failed)
                    .and_then(|s| s.handle);
                return Ok(PinCheck::Exhausted(handle));
            }
            return Ok(PinCheck::Mismatch { attempts });
        }

        let Some(handle) = active.handle.take() else {
            return Err(SlideshowError::invalid_state(
                format!("pairing session for {device_id} has no device handle"),
                active.phase,
            ));
        };
        active.phase = PairingPhase::Verifying;
        Ok(PinCheck::Verify {
            generation: active.generation,
            handle,
        })
    }

    /// Apply the device's answer to a verified PIN
    pub fn verify_finished(
        &mut self,
        device_id: &str,
        generation: u64,
        handle: Box<dyn PairingHandle>,
        result: VerifyResult,
    ) -> Verified {
        let max_attempts = self.max_attempts;
        let Some(active) = self
            .sessions
            .get_mut(device_id)
            .filter(|s| s.generation == generation && s.phase == PairingPhase::Verifying)
        else {
            return Verified::Stale(handle);
        };

        match result {
            VerifyResult::Succeeded => {
                self.finish(device_id, PairingPhase::Paired);
                tracing::info!("Pairing with {} succeeded", device_id);
                Verified::Paired(handle)
            }
            VerifyResult::Rejected(error) => {
                active.session.attempts += 1;
                let attempts = active.session.attempts;
                if attempts >= max_attempts {
                    self.finish(device_id, PairingPhase::Failed);
                    tracing::warn!("Pairing with {} failed after {} attempts", device_id, attempts);
                    return Verified::Failed(handle, error);
                }
                active.handle = Some(handle);
                active.phase = PairingPhase::AwaitingPin;
                Verified::Retry { attempts, error }
            }
            VerifyResult::Failed(error) => {
                self.finish(device_id, PairingPhase::Failed);
                tracing::warn!("Pairing with {} failed: {}", device_id, error);
                Verified::Failed(handle, error)
            }
        }
    }

    /// Cancel a waiting session
    ///
    /// Returns `Ok(None)` if no session exists, otherwise the handle to close
    /// (absent while the device has not answered yet).
    ///
    /// # Errors
    ///
    /// `InvalidState` while a PIN is being verified.
    pub fn cancel(&mut self, device_id: &str) -> Result<Option<Option<Box<dyn PairingHandle>>>> {
        let Some(active) = self.sessions.get(device_id) else {
            return Ok(None);
        };
        if active.phase == PairingPhase::Verifying {
            return Err(SlideshowError::invalid_state(
                format!("pairing with {device_id} is being verified"),
                active.phase,
            ));
        }

        tracing::info!("Pairing cancelled for {}", device_id);
        Ok(self
            .finish(device_id, PairingPhase::Cancelled)
            .map(|s| s.handle))
    }

    /// Remove every session past its deadline
    ///
    /// Returns the device ids and any handles to close.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, Option<Box<dyn PairingHandle>>)> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                let session = self.finish(&id, PairingPhase::Failed)?;
                tracing::warn!("Pairing session for {} expired in {:?}", id, session.phase);
                Some((id, session.handle))
            })
            .collect()
    }

    /// End every session, for shutdown
    pub fn drain(&mut self) -> Vec<Box<dyn PairingHandle>> {
        self.finished.clear();
        self.sessions
            .drain()
            .filter_map(|(_, s)| s.handle)
            .collect()
    }
}
