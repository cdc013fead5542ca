use std::time::Duration;

use crate::error::{Result, SlideshowError};
use crate::transport::{DeviceLink, MediaKind};
use crate::types::EngineConfig;

/// Bounded wait and retry budget for one push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPolicy {
    /// Wait bound per attempt
    pub timeout: Duration,
    /// Extra attempts for transient failures
    pub retries: u32,
    /// Delay before the first retry, doubled after each
    pub backoff: Duration,
}

impl PushPolicy {
    /// Policy from engine configuration
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.push_timeout,
            retries: config.push_retries,
            backoff: config.push_backoff,
        }
    }
}

impl Default for PushPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Tell a device to play `url`
///
/// Only transient failures are retried; authorization and capability
/// errors come back on the first occurrence.
///
/// # Errors
///
/// Returns the last failure once the budget is spent.
pub async fn push(
    link: &dyn DeviceLink,
    device_id: &str,
    url: &str,
    kind: MediaKind,
    policy: PushPolicy,
) -> Result<()> {
    let mut delay = policy.backoff;
    let mut attempt = 0;

    loop {
        let error = match tokio::time::timeout(policy.timeout, link.play_url(url, kind)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => SlideshowError::Timeout {
                device_id: device_id.to_string(),
                duration: policy.timeout,
            },
        };

        if !error.is_transient() || attempt >= policy.retries {
            return Err(error);
        }

        attempt += 1;
        tracing::debug!(
            "Push to {} failed ({}), retry {} of {} in {:?}",
            device_id,
            error,
            attempt,
            policy.retries,
            delay
        );
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
}
