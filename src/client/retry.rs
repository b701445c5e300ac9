use std::time::Duration;

/// Delay policy for rate-limited responses that carry no `Retry-After`.
///
/// The delay for the n-th such retry (0-indexed) is `base * 2^n`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, retry_count: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(retry_count);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

/// Parse a `Retry-After` value given in whole seconds.
///
/// HTTP-date values are not accepted; the statistics API only sends seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
