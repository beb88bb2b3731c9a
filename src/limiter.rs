//! Rate limiters consulted by the driver between cycles.

use std::time::Duration;

pub trait RateLimiter: Send + Sync {
    /// Time to sleep before the next cycle.
    fn wait_duration(&self) -> Duration;
    fn name(&self) -> &str;
}

/// Waits a fixed interval. Used when metrics only go to stdout.
#[derive(Debug, Clone)]
pub struct ConstantLimiter {
    interval: Duration,
}

impl ConstantLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for ConstantLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RateLimiter for ConstantLimiter {
    fn wait_duration(&self) -> Duration {
        self.interval
    }

    fn name(&self) -> &str {
        "constant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_limiter() {
        let l = ConstantLimiter::default();
        assert_eq!(l.wait_duration(), Duration::from_secs(10));
        assert_eq!(l.name(), "constant");
    }
}
