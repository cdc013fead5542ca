//! Round-robin distribution of images across devices
//!
//! At step `k` the device in slot `i` of `N` shows image
//! `(k * N + i) mod M`. A cycle completes whenever `k * N` crosses a
//! multiple of `M`.

#[cfg(test)]
mod tests;

/// Image shown by slot `slot` of `devices` at `step`
///
/// Computed in 128-bit arithmetic, so no step value overflows. An empty
/// image set is treated as a single image.
#[must_use]
pub fn image_index(step: u64, devices: usize, slot: usize, images: usize) -> usize {
    let value = (u128::from(step) * devices as u128 + slot as u128) % images.max(1) as u128;
    // value < images, which came from a usize
    usize::try_from(value).unwrap_or(0)
}

/// Full passes through `images` completed once steps `0..=step` were shown
#[must_use]
pub fn cycles_through(step: u64, devices: usize, images: usize) -> u64 {
    let shown = (u128::from(step) + 1) * devices as u128;
    u64::try_from(shown / images.max(1) as u128).unwrap_or(u64::MAX)
}

/// Cycles completed by moving from `step` to `step + 1`
#[must_use]
pub fn cycles_crossed(step: u64, devices: usize, images: usize) -> u64 {
    let m = images.max(1) as u128;
    let n = devices as u128;
    let before = u128::from(step) * n / m;
    let after = (u128::from(step) + 1) * n / m;
    u64::try_from(after - before).unwrap_or(u64::MAX)
}

/// Image index for each slot at `step`
#[must_use]
pub fn assignment(step: u64, devices: usize, images: usize) -> Vec<usize> {
    (0..devices)
        .map(|slot| image_index(step, devices, slot, images))
        .collect()
}

/// Step position and cycle count of a running slideshow
///
/// Timer ticks and manual navigation share the same position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionScheduler {
    step: u64,
    cycles_completed: u64,
}

impl DistributionScheduler {
    /// Scheduler at step 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step
    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Cycles completed so far
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Advance one step with `devices` active; returns the cycles completed
    pub fn next(&mut self, devices: usize, images: usize) -> u64 {
        let crossed = cycles_crossed(self.step, devices, images);
        self.step = self.step.saturating_add(1);
        self.cycles_completed = self.cycles_completed.saturating_add(crossed);
        crossed
    }

    /// Go back one step, floored at 0; returns whether the step moved
    ///
    /// Completed cycles are never taken back.
    pub fn previous(&mut self) -> bool {
        if self.step == 0 {
            return false;
        }
        self.step -= 1;
        true
    }

    /// Forget completed cycles, keep the position
    pub fn reset_cycles(&mut self) {
        self.cycles_completed = 0;
    }

    /// Back to step 0
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Image index per slot at the current step
    #[must_use]
    pub fn current(&self, devices: usize, images: usize) -> Vec<usize> {
        assignment(self.step, devices, images)
    }

    /// Image index per slot at the step before the current one
    #[must_use]
    pub fn preceding(&self, devices: usize, images: usize) -> Option<Vec<usize>> {
        self.step
            .checked_sub(1)
            .map(|step| assignment(step, devices, images))
    }
}
