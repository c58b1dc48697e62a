use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota as RateQuota, RateLimiter};

#[derive(Debug, thiserror::Error)]
#[error("Too many requests, slow down")]
pub struct RateLimited;

/// Per-user request limiter keyed by the token subject.
pub struct UserRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl UserRateLimiter {
    /// A limit of zero is treated as one request per minute.
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(RateQuota::per_minute(per_minute)),
        }
    }

    pub fn check(&self, user_id: &str) -> Result<(), RateLimited> {
        self.limiter.check_key(&user_id.to_string()).map_err(|_| {
            tracing::warn!("Rate limit hit for {}", user_id);
            RateLimited
        })
    }
}
