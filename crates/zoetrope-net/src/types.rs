use std::time::Duration;

use bytes::Bytes;

/// Completed fetch with cache-aware byte accounting.
///
/// `transferred_bytes` is what actually crossed the network (zero or far
/// below `resource_bytes` on a cache hit); `resource_bytes` is the decoded
/// payload size. Only non-cached responses are fed to the bandwidth
/// estimator.
#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub bytes: Bytes,
    pub status: u16,
    pub elapsed: Duration,
    pub transferred_bytes: u64,
    pub resource_bytes: u64,
}

impl FetchResponse {
    /// Heuristic cache-hit detection: nothing (or almost nothing) crossed
    /// the wire for a non-trivial payload.
    pub fn is_cache_hit(&self) -> bool {
        if self.resource_bytes == 0 {
            return false;
        }
        self.transferred_bytes == 0
            || (self.transferred_bytes as f64) < 0.1 * self.resource_bytes as f64
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_options(opts: &NetOptions) -> Self {
        Self {
            max_retries: opts.max_retries,
            base_delay: opts.retry_base_delay,
            max_delay: opts.max_retry_delay,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
        exponential.min(self.max_delay)
    }
}
