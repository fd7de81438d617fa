//! Mockable Sleep for Polling Loops
//!
//! Every polling wait in widgetprobe blocks through a [`Sleeper`]. A sleeper is
//! either real (delegates to [`std::thread::sleep`]) or mocked, in which case
//! each call returns immediately and adds the requested duration to a virtual
//! counter. All clones of a sleeper share the same mode and counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct SleepState {
    mocked: AtomicBool,
    slept_micros: AtomicU64,
}

/// Shared sleep primitive, real or mocked
#[derive(Debug, Clone, Default)]
pub struct Sleeper {
    state: Arc<SleepState>,
}

impl Sleeper {
    /// Create a sleeper in real mode
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sleeper that starts in mocked mode
    #[must_use]
    pub fn new_mocked() -> Self {
        let sleeper = Self::new();
        sleeper.enable_mock();
        sleeper
    }

    /// Sleep for `duration`, or record it when mocked
    pub fn sleep(&self, duration: Duration) {
        if self.is_mocked() {
            let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
            self.state.slept_micros.fetch_add(micros, Ordering::SeqCst);
        } else {
            std::thread::sleep(duration);
        }
    }

    /// Sleep for a number of (possibly fractional) seconds
    pub fn sleep_secs(&self, seconds: f64) {
        if seconds > 0.0 {
            self.sleep(Duration::from_secs_f64(seconds));
        }
    }

    /// Switch to mocked mode and reset the virtual counter
    pub fn enable_mock(&self) {
        self.state.slept_micros.store(0, Ordering::SeqCst);
        self.state.mocked.store(true, Ordering::SeqCst);
    }

    /// Switch back to real sleeping
    pub fn disable_mock(&self) {
        self.state.mocked.store(false, Ordering::SeqCst);
    }

    /// Whether sleeps are currently virtual
    #[must_use]
    pub fn is_mocked(&self) -> bool {
        self.state.mocked.load(Ordering::SeqCst)
    }

    /// Virtual time accumulated since mocking was last enabled
    #[must_use]
    pub fn total_time_slept(&self) -> Duration {
        Duration::from_micros(self.state.slept_micros.load(Ordering::SeqCst))
    }

    /// Virtual seconds accumulated since mocking was last enabled
    #[must_use]
    pub fn total_secs_slept(&self) -> f64 {
        self.total_time_slept().as_secs_f64()
    }

    /// Enable mocking for the lifetime of the returned guard
    #[must_use]
    pub fn mocked(&self) -> MockedSleep {
        self.enable_mock();
        MockedSleep {
            sleeper: self.clone(),
        }
    }
}

/// Guard returned by [`Sleeper::mocked`]; restores real sleeping on drop
#[derive(Debug)]
pub struct MockedSleep {
    sleeper: Sleeper,
}

impl MockedSleep {
    /// Virtual time accumulated so far
    #[must_use]
    pub fn total_time_slept(&self) -> Duration {
        self.sleeper.total_time_slept()
    }
}

impl Drop for MockedSleep {
    fn drop(&mut self) {
        self.sleeper.disable_mock();
    }
}
