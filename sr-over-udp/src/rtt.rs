//! Round-trip-time sampling and retransmission-timeout estimation.
//!
//! The timeout is the plain arithmetic mean of recent RTT samples, capped at
//! a ceiling:
//!
//! ```text
//!   RTO = initial                          (no samples yet)
//!   RTO = min(mean(samples), ceiling)      (otherwise)
//! ```
//!
//! There is no variance margin and no back-off, so the timeout can drop
//! below the true round trip on a low-latency history.  Samples live in a
//! bounded rolling window with a running sum; for runs shorter than the
//! window the result equals the mean over every sample ever observed.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::RtoConfig;
use crate::stats::RttSummary;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    config: RtoConfig,
    window: VecDeque<Duration>,
    window_sum: Duration,
    summary: RttSummary,
}

impl RttEstimator {
    pub fn new(config: RtoConfig) -> Self {
        let capacity = config.history.min(1024);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
            window_sum: Duration::ZERO,
            summary: RttSummary::default(),
        }
    }

    /// Record one round-trip sample.
    pub fn observe(&mut self, rtt: Duration) {
        if self.window.len() == self.config.history {
            if let Some(oldest) = self.window.pop_front() {
                self.window_sum -= oldest;
            }
        }
        self.window.push_back(rtt);
        self.window_sum += rtt;
        self.summary.record(rtt);
    }

    /// Timeout to arm the next retransmission timer with.
    pub fn current_timeout(&self) -> Duration {
        if let Some(fixed) = self.config.fixed {
            return fixed;
        }
        if self.window.is_empty() {
            return self.config.initial;
        }
        let mean = self.window_sum / self.window.len() as u32;
        mean.min(self.config.ceiling)
    }

    /// Recent samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = Duration> + '_ {
        self.window.iter().copied()
    }

    pub fn summary(&self) -> RttSummary {
        self.summary
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(RtoConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn default_timeout_without_samples() {
        let est = RttEstimator::default();
        assert_eq!(est.current_timeout(), ms(300));
    }

    #[test]
    fn timeout_is_raw_average() {
        let mut est = RttEstimator::default();
        est.observe(ms(10));
        est.observe(ms(20));
        est.observe(ms(60));
        assert_eq!(est.current_timeout(), ms(30));
    }

    #[test]
    fn timeout_capped_at_ceiling() {
        let mut est = RttEstimator::default();
        est.observe(ms(900));
        est.observe(ms(500));
        assert_eq!(est.current_timeout(), ms(300));
    }

    #[test]
    fn timeout_can_fall_below_latest_rtt() {
        let mut est = RttEstimator::default();
        for _ in 0..9 {
            est.observe(ms(1));
        }
        est.observe(ms(100));
        assert!(est.current_timeout() < ms(100));
    }

    #[test]
    fn window_rolls_over_oldest_samples() {
        let mut est = RttEstimator::new(RtoConfig {
            history: 2,
            ..RtoConfig::default()
        });
        est.observe(ms(200));
        est.observe(ms(10));
        est.observe(ms(30));
        assert_eq!(est.current_timeout(), ms(20));
        assert_eq!(est.samples().collect::<Vec<_>>(), vec![ms(10), ms(30)]);
        // The summary still covers everything.
        assert_eq!(est.summary().count(), 3);
        assert_eq!(est.summary().max_ms(), Some(200.0));
    }

    #[test]
    fn fixed_timeout_overrides_estimate() {
        let mut est = RttEstimator::new(RtoConfig {
            fixed: Some(ms(50)),
            ..RtoConfig::default()
        });
        assert_eq!(est.current_timeout(), ms(50));
        est.observe(ms(5));
        assert_eq!(est.current_timeout(), ms(50));
        assert_eq!(est.summary().count(), 1);
    }
}
