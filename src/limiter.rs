//! Admission control for request dispatch

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Token-bucket admission gate
///
/// Replenishes `rate` permits per `period` and allows bursts up to one
/// bucket's capacity. The disabled variant admits immediately, so callers
/// never need to branch on whether pacing is configured.
pub struct RateGate {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rate: Option<f64>,
    period: Duration,
}

impl RateGate {
    /// Create a gate admitting `rate` requests per `period`.
    ///
    /// A rate of zero or below disables pacing entirely.
    pub fn new(rate: f64, period: Duration) -> Self {
        let limiter = if rate > 0.0 && !period.is_zero() {
            // One permit every period/rate, bucket capacity of one period's
            // worth of permits.
            let interval = period.div_f64(rate);
            let burst = NonZeroU32::new((rate.ceil() as u32).max(1));
            Quota::with_period(interval)
                .zip(burst)
                .map(|(quota, burst)| RateLimiter::direct(quota.allow_burst(burst)))
        } else {
            None
        };

        Self {
            limiter,
            rate: (rate > 0.0).then_some(rate),
            period,
        }
    }

    /// Create a gate that always admits immediately.
    pub fn none() -> Self {
        Self {
            limiter: None,
            rate: None,
            period: Duration::from_secs(60),
        }
    }

    /// Suspend until one admission slot is available.
    ///
    /// Never fails; the disabled variant returns immediately.
    pub async fn acquire(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Whether a real rate limit is active (used for lag warnings).
    pub fn is_active(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured rate per period, if any.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("rate", &self.rate)
            .field("period", &self.period)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_gate_disabled() {
        let gate = RateGate::none();
        assert!(!gate.is_active());
        assert!(gate.rate().is_none());
    }

    #[test]
    fn test_gate_zero_rate() {
        let gate = RateGate::new(0.0, Duration::from_secs(60));
        assert!(!gate.is_active());
    }

    #[test]
    fn test_gate_enabled() {
        let gate = RateGate::new(120.0, Duration::from_secs(60));
        assert!(gate.is_active());
        assert_eq!(gate.rate(), Some(120.0));
    }

    #[tokio::test]
    async fn test_gate_disabled_admits_immediately() {
        let gate = RateGate::none();
        let start = Instant::now();
        for _ in 0..1000 {
            gate.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_gate_paces_beyond_burst() {
        // 10 permits per second with a bucket of 10: the 21st acquire
        // cannot complete before ~1s of replenishment has elapsed.
        let gate = RateGate::new(10.0, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..21 {
            gate.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
