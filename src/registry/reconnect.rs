use std::time::Duration;

use crate::types::EngineConfig;

/// Bounded exponential backoff for automatic reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before the device reverts to `Discovered`
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Policy from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            initial_delay: config.reconnect_delay,
            max_delay: config.reconnect_max_delay,
        }
    }

    /// Delay before attempt `attempt` (1-based): `initial * 2^(attempt-1)`, capped
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempts_made`
    #[must_use]
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
