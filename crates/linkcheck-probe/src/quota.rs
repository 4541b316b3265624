//! Outbound call budget.
//!
//! Caps how many URLs the process fetches per minute, independently of the
//! per-sub-job pacing. Unlike pacing, running out is not waited on: the
//! caller is told and decides to suspend.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};

use crate::error::{ProbeError, ProbeResult};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Process-wide outbound request budget.
#[derive(Clone)]
pub struct OutboundQuota {
    limiter: Arc<DirectRateLimiter>,
}

impl OutboundQuota {
    /// Allow `calls_per_minute` outbound requests, with the full minute's
    /// worth available as an initial burst.
    pub fn per_minute(calls_per_minute: NonZeroU32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(calls_per_minute))),
        }
    }

    /// Take one call from the budget without waiting.
    pub fn try_acquire(&self) -> ProbeResult<()> {
        self.limiter
            .check()
            .map_err(|_| ProbeError::QuotaExceeded)
    }
}

impl std::fmt::Debug for OutboundQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQuota").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhausts_after_burst() {
        let quota = OutboundQuota::per_minute(NonZeroU32::new(3).unwrap());
        for _ in 0..3 {
            quota.try_acquire().unwrap();
        }
        assert!(matches!(quota.try_acquire(), Err(ProbeError::QuotaExceeded)));
    }

    #[test]
    fn clones_share_one_budget() {
        let quota = OutboundQuota::per_minute(NonZeroU32::new(1).unwrap());
        let other = quota.clone();
        quota.try_acquire().unwrap();
        assert!(other.try_acquire().is_err());
    }
}
