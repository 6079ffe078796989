use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};
use tracing::debug;

/// Requests the API accepts per window
pub const DEFAULT_MAX_REQUESTS: u32 = 400;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Client-side pacing: bursts of up to `max_requests`, refilled evenly over `window`.
pub struct RateLimiter {
    inner: DefaultDirectRateLimiter,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .map_or_else(|| Quota::per_second(burst), |q| q.allow_burst(burst));
        Self {
            inner: Governor::direct(quota),
        }
    }

    /// Wait until the quota admits another request.
    pub async fn acquire(&self) {
        if self.inner.check().is_ok() {
            return;
        }
        debug!("Rate limit reached, waiting");
        self.inner.until_ready().await;
    }
}
