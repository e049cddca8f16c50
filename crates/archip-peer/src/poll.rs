//! Bounded polling

use crate::error::PeerResult;
use archip_common::SupervisorConfig;
use std::time::Duration;

/// Interval and attempt budget of a polling loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Policy used while waiting for a peer to come up
    #[must_use]
    pub const fn start(config: &SupervisorConfig) -> Self {
        Self::new(config.poll_interval(), config.start_attempts)
    }

    /// Policy used while waiting for a peer to go away
    #[must_use]
    pub const fn stop(config: &SupervisorConfig) -> Self {
        Self::new(config.poll_interval(), config.stop_attempts)
    }

    /// Total time the policy may wait
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }

    /// Total wait, in milliseconds
    #[must_use]
    pub fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Poll `check` until it reports `true` or the budget is spent.
///
/// The condition is checked once up front, then after every interval.
/// Returns `Ok(false)` once `max_attempts` intervals have elapsed without
/// the condition holding; errors from `check` end the loop immediately.
pub async fn poll_until<F>(policy: PollPolicy, mut check: F) -> PeerResult<bool>
where
    F: FnMut() -> PeerResult<bool>,
{
    if check()? {
        return Ok(true);
    }
    for _ in 0..policy.max_attempts {
        tokio::time::sleep(policy.interval).await;
        if check()? {
            return Ok(true);
        }
    }
    Ok(false)
}
