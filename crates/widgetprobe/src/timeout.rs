//! Polling Timeouts
//!
//! [`Timeout`] is an iterator of elapsed seconds that sleeps between steps.
//! Connection search iterates it and stops as soon as a scan succeeds.

use crate::context::ProbeContext;
use crate::sleep::Sleeper;

/// Iterator that yields the elapsed time while sleeping up to `total_secs`.
///
/// Yields `0.0` first, then sleeps for `min(remaining, 1.0)` seconds before
/// each subsequent yield, ending with a final yield of `total_secs`. A zero
/// budget yields `0.0` exactly once.
#[derive(Debug, Clone)]
pub struct Timeout {
    sleeper: Sleeper,
    total_secs: f64,
    elapsed: f64,
    started: bool,
    done: bool,
}

impl Timeout {
    /// Create a timeout of `total_secs` seconds
    #[must_use]
    pub fn new(sleeper: Sleeper, total_secs: f64) -> Self {
        Self {
            sleeper,
            total_secs: total_secs.max(0.0),
            elapsed: 0.0,
            started: false,
            done: false,
        }
    }

    /// The configured default timeout (10 seconds unless overridden)
    #[must_use]
    pub fn default_period(context: &ProbeContext) -> Self {
        Self::new(context.sleeper().clone(), context.config().default_timeout_secs)
    }

    /// The configured long timeout (30 seconds unless overridden)
    #[must_use]
    pub fn long_period(context: &ProbeContext) -> Self {
        Self::new(context.sleeper().clone(), context.config().long_timeout_secs)
    }

    /// Total budget in seconds
    #[must_use]
    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }
}

impl Iterator for Timeout {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.done {
            return None;
        }
        if self.started {
            let step = (self.total_secs - self.elapsed).min(1.0);
            self.sleeper.sleep_secs(step);
            self.elapsed += step;
        }
        self.started = true;
        if self.total_secs - self.elapsed <= 0.0 {
            self.done = true;
        }
        Some(self.elapsed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_yields_every_second_and_final_total() {
        let sleeper = Sleeper::new_mocked();
        let steps: Vec<f64> = Timeout::new(sleeper.clone(), 3.0).collect();
        assert_eq!(steps, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(sleeper.total_time_slept(), Duration::from_secs(3));
    }

    #[test]
    fn test_fractional_budget_sleeps_remainder() {
        let sleeper = Sleeper::new_mocked();
        let steps: Vec<f64> = Timeout::new(sleeper.clone(), 1.5).collect();
        assert_eq!(steps, vec![0.0, 1.0, 1.5]);
        assert_eq!(sleeper.total_time_slept(), Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_budget_yields_once_without_sleeping() {
        let sleeper = Sleeper::new_mocked();
        let steps: Vec<f64> = Timeout::new(sleeper.clone(), 0.0).collect();
        assert_eq!(steps, vec![0.0]);
        assert_eq!(sleeper.total_time_slept(), Duration::ZERO);
    }

    #[test]
    fn test_breaking_early_stops_sleeping() {
        let sleeper = Sleeper::new_mocked();
        for elapsed in Timeout::new(sleeper.clone(), 10.0) {
            if elapsed >= 2.0 {
                break;
            }
        }
        assert_eq!(sleeper.total_time_slept(), Duration::from_secs(2));
    }

    #[test]
    fn test_default_period_uses_config() {
        let context = ProbeContext::new_mocked();
        assert_eq!(Timeout::default_period(&context).total_secs(), 10.0);
        assert_eq!(Timeout::long_period(&context).total_secs(), 30.0);
    }
}
