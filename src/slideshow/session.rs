use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::SessionState;
use crate::error::{Result, SlideshowError};
use crate::scheduler::DistributionScheduler;
use crate::types::{MAX_DISPLAY_TIME, SlideshowConfig, SlideshowStats};

/// One device's part of a step
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Device in its slot
    pub device_id: String,
    /// Image to show
    pub image: PathBuf,
    /// Image the slot showed at the previous step, for transitions
    pub previous: Option<PathBuf>,
}

/// Clip timing in video mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipTiming {
    /// Crossfade length
    pub transition: Duration,
    /// Hold after the crossfade
    pub hold: Duration,
}

/// Work for one display step
#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    /// Step index
    pub step: u64,
    /// Per-device assignments, in selection order
    pub assignments: Vec<Assignment>,
    /// `Some` in video mode
    pub clip: Option<ClipTiming>,
    /// Cycle count after this step's advance, when it completed a cycle
    pub cycle_completed: Option<u64>,
}

/// Per-device result summary fed back after a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTally {
    /// Devices that displayed their image
    pub delivered: u64,
    /// Devices that failed
    pub failed: u64,
}

/// Slideshow state machine
///
/// Holds configuration, image set, position and statistics. It performs no
/// I/O: callers feed it the active device list and timer instants, and carry
/// out the [`StepPlan`]s it returns. Only one step is in flight at a time;
/// navigation during a step moves the position and the latest position is
/// shown when the step finishes.
#[derive(Debug)]
pub struct SlideshowSession {
    state: SessionState,
    config: Option<SlideshowConfig>,
    images: Arc<Vec<PathBuf>>,
    scheduler: DistributionScheduler,
    stats: SlideshowStats,
    excluded: BTreeSet<String>,
    in_flight: Option<u64>,
    dirty: bool,
    pending_cycle: Option<u64>,
    next_due: Option<Instant>,
    max_devices: usize,
}

impl SlideshowSession {
    /// Stopped, unconfigured session
    #[must_use]
    pub fn new(max_devices: usize) -> Self {
        Self {
            state: SessionState::Stopped,
            config: None,
            images: Arc::new(Vec::new()),
            scheduler: DistributionScheduler::new(),
            stats: SlideshowStats::default(),
            excluded: BTreeSet::new(),
            in_flight: None,
            dirty: false,
            pending_cycle: None,
            next_due: None,
            max_devices,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> Option<&SlideshowConfig> {
        self.config.as_ref()
    }

    /// Resolved image set
    #[must_use]
    pub fn images(&self) -> Arc<Vec<PathBuf>> {
        Arc::clone(&self.images)
    }

    /// Current step index
    #[must_use]
    pub fn step(&self) -> u64 {
        self.scheduler.step()
    }

    /// Statistics of the current or last run
    #[must_use]
    pub fn stats(&self) -> &SlideshowStats {
        &self.stats
    }

    /// Step currently being delivered
    #[must_use]
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// When the timer next fires
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.next_due
    }

    /// Devices currently left out of distribution
    #[must_use]
    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    /// Check if a device is one of the selected devices
    #[must_use]
    pub fn is_selected(&self, device_id: &str) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.devices.iter().any(|d| d == device_id))
    }

    /// Selected devices that are connected and not excluded, in slot order
    pub fn active_devices(&self, is_connected: impl Fn(&str) -> bool) -> Vec<String> {
        self.config
            .as_ref()
            .map(|config| {
                config
                    .devices
                    .iter()
                    .filter(|id| !self.excluded.contains(id.as_str()) && is_connected(id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace configuration and image set
    ///
    /// Only allowed while stopped. Resets position, statistics and
    /// exclusions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while running and `Validation` for an invalid
    /// configuration.
    pub fn configure(&mut self, config: SlideshowConfig, images: Vec<PathBuf>) -> Result<()> {
        if self.is_running() {
            return Err(SlideshowError::invalid_state(
                "cannot reconfigure a running slideshow",
                self.state,
            ));
        }
        validate_config(&config, self.max_devices)?;
        if images.is_empty() {
            return Err(SlideshowError::validation("image set is empty"));
        }

        tracing::info!(
            "Configured slideshow: {} images, {} devices, {}s per step, video mode {}",
            images.len(),
            config.devices.len(),
            config.display_time,
            config.video_mode
        );
        self.config = Some(config);
        self.images = Arc::new(images);
        self.scheduler.reset();
        self.stats = SlideshowStats::default();
        self.excluded.clear();
        Ok(())
    }

    /// Enter `Running` and plan the current step
    ///
    /// The position is kept from the previous run; statistics restart.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if not configured, `InvalidState` if already
    /// running.
    pub fn start(&mut self, active: &[String]) -> Result<StepPlan> {
        if self.is_running() {
            return Err(SlideshowError::invalid_state(
                "slideshow already running",
                self.state,
            ));
        }
        let Some(config) = &self.config else {
            return Err(SlideshowError::validation(
                "slideshow not configured; set images directory and devices first",
            ));
        };
        if self.images.is_empty() || config.devices.is_empty() {
            return Err(SlideshowError::validation(
                "slideshow needs at least one image and one device",
            ));
        }

        self.state = SessionState::Running;
        self.scheduler.reset_cycles();
        self.stats = SlideshowStats {
            started_at: Some(Utc::now()),
            ..SlideshowStats::default()
        };
        self.excluded.clear();
        self.next_due = None;
        self.dirty = false;
        self.pending_cycle = None;

        tracing::info!("Slideshow started at step {}", self.scheduler.step());
        Ok(self.begin_step(active))
    }

    /// Leave `Running`; returns the run's statistics, `None` if already stopped
    ///
    /// The position is kept.
    pub fn stop(&mut self) -> Option<SlideshowStats> {
        if !self.is_running() {
            return None;
        }
        self.state = SessionState::Stopped;
        self.in_flight = None;
        self.next_due = None;
        self.dirty = false;
        self.pending_cycle = None;
        tracing::info!("Slideshow stopped at step {}", self.scheduler.step());
        Some(self.stats.clone())
    }

    /// Timer deadline reached: advance and plan the next step
    ///
    /// Returns `None` when not running, when the deadline has not passed or
    /// while a step is in flight.
    pub fn tick(&mut self, now: Instant, active: &[String]) -> Option<StepPlan> {
        if !self.is_running() || self.in_flight.is_some() {
            return None;
        }
        if self.next_due.is_none_or(|due| due > now) {
            return None;
        }
        self.advance(active.len());
        Some(self.begin_step(active))
    }

    /// Manual advance
    ///
    /// Returns the plan to run now, or `None` if a step is in flight (the new
    /// position is shown when it finishes).
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when not running.
    pub fn next(&mut self, active: &[String]) -> Result<Option<StepPlan>> {
        self.require_running("next")?;
        self.advance(active.len());
        Ok(self.navigate(active))
    }

    /// Manual step back, floored at step 0
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when not running.
    pub fn previous(&mut self, active: &[String]) -> Result<Option<StepPlan>> {
        self.require_running("previous")?;
        self.scheduler.previous();
        Ok(self.navigate(active))
    }

    /// Record the outcome of step `step`
    ///
    /// Stale results (stopped since, or another step) are ignored and return
    /// `None`. Otherwise the timer is rearmed, or the plan for a position
    /// changed during the step is returned.
    pub fn finish_step(
        &mut self,
        step: u64,
        tally: StepTally,
        now: Instant,
        active: &[String],
    ) -> Option<Finished> {
        if !self.is_running() || self.in_flight != Some(step) {
            tracing::debug!("Ignoring stale result of step {}", step);
            return None;
        }

        self.stats.images_displayed += tally.delivered;
        self.stats.errors += tally.failed;
        self.in_flight = None;

        let follow_up = if self.dirty {
            Some(self.begin_step(active))
        } else {
            self.next_due = Some(now + self.display_duration());
            None
        };
        Some(Finished {
            stats: self.stats.clone(),
            follow_up,
        })
    }

    /// Change the display time; a waiting timer is rearmed from `now`
    ///
    /// # Errors
    ///
    /// Returns `Validation` for 0 or more than [`MAX_DISPLAY_TIME`], and
    /// `InvalidState` if not configured.
    pub fn update_display_time(&mut self, seconds: u64, now: Instant) -> Result<()> {
        check_display_time(seconds)?;
        let Some(config) = self.config.as_mut() else {
            return Err(SlideshowError::invalid_state(
                "slideshow not configured",
                self.state,
            ));
        };
        config.display_time = seconds;
        if self.next_due.is_some() {
            self.next_due = Some(now + Duration::from_secs(seconds));
        }
        tracing::info!("Display time set to {}s", seconds);
        Ok(())
    }

    /// Leave a device out of distribution until it is included again
    ///
    /// Returns whether the device was newly excluded.
    pub fn exclude(&mut self, device_id: &str) -> bool {
        let added = self.excluded.insert(device_id.to_string());
        if added {
            tracing::info!("Device {} excluded from distribution", device_id);
        }
        added
    }

    /// Put an excluded device back into distribution
    pub fn include(&mut self, device_id: &str) -> bool {
        self.excluded.remove(device_id)
    }

    fn display_duration(&self) -> Duration {
        self.config
            .as_ref()
            .map_or(Duration::from_secs(1), SlideshowConfig::display_duration)
    }

    fn require_running(&self, operation: &str) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SlideshowError::invalid_state(
                format!("cannot {operation}: slideshow not running"),
                self.state,
            ))
        }
    }

    fn advance(&mut self, devices: usize) {
        if self.scheduler.next(devices, self.images.len()) > 0 {
            self.stats.cycles_completed = self.scheduler.cycles_completed();
            self.pending_cycle = Some(self.stats.cycles_completed);
        }
    }

    fn navigate(&mut self, active: &[String]) -> Option<StepPlan> {
        if self.in_flight.is_some() {
            self.dirty = true;
            None
        } else {
            Some(self.begin_step(active))
        }
    }

    fn begin_step(&mut self, active: &[String]) -> StepPlan {
        let plan = self.plan(active);
        self.in_flight = Some(plan.step);
        self.next_due = None;
        self.dirty = false;
        plan
    }

    fn plan(&mut self, active: &[String]) -> StepPlan {
        let devices = active.len();
        let count = self.images.len();
        let current = self.scheduler.current(devices, count);
        let preceding = self.scheduler.preceding(devices, count);

        let assignments = active
            .iter()
            .zip(current)
            .enumerate()
            .filter_map(|(slot, (device_id, index))| {
                let image = self.images.get(index)?.clone();
                let previous = preceding
                    .as_ref()
                    .and_then(|p| p.get(slot))
                    .and_then(|&i| self.images.get(i))
                    .cloned();
                Some(Assignment {
                    device_id: device_id.clone(),
                    image,
                    previous,
                })
            })
            .collect();

        let clip = self.config.as_ref().filter(|c| c.video_mode).map(|c| {
            let transition = c.transition();
            ClipTiming {
                transition,
                hold: c.display_duration().saturating_sub(transition),
            }
        });

        StepPlan {
            step: self.scheduler.step(),
            assignments,
            clip,
            cycle_completed: self.pending_cycle.take(),
        }
    }
}

/// Result of [`SlideshowSession::finish_step`]
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    /// Totals after the step
    pub stats: SlideshowStats,
    /// Step to run immediately
    pub follow_up: Option<StepPlan>,
}

/// Check a configuration against the device limit
///
/// # Errors
///
/// Returns `Validation` for an empty, oversized or duplicated device list, a
/// display time outside `1..=MAX_DISPLAY_TIME`, and in video mode a
/// transition that is negative, not finite or longer than the display time.
pub fn validate_config(config: &SlideshowConfig, max_devices: usize) -> Result<()> {
    if config.devices.is_empty() {
        return Err(SlideshowError::validation("no devices selected"));
    }
    if config.devices.len() > max_devices {
        return Err(SlideshowError::validation(format!(
            "{} devices selected, at most {max_devices} allowed",
            config.devices.len()
        )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = config.devices.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(SlideshowError::validation(format!(
            "device {dup} selected twice"
        )));
    }
    check_display_time(config.display_time)?;
    if config.video_mode {
        let transition = config.transition_duration;
        if !transition.is_finite() || transition < 0.0 {
            return Err(SlideshowError::validation(format!(
                "transition duration {transition} is not a valid length"
            )));
        }
        #[allow(clippy::cast_precision_loss)]
        let display = config.display_time as f64;
        if transition > display {
            return Err(SlideshowError::validation(format!(
                "transition of {transition}s is longer than the {}s display time",
                config.display_time
            )));
        }
    }
    Ok(())
}

fn check_display_time(seconds: u64) -> Result<()> {
    if seconds == 0 {
        return Err(SlideshowError::validation("display time must be positive"));
    }
    if seconds > MAX_DISPLAY_TIME {
        return Err(SlideshowError::validation(format!(
            "display time of {seconds}s exceeds {MAX_DISPLAY_TIME}s"
        )));
    }
    Ok(())
}
