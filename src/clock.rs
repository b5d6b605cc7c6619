//! Wall-clock abstraction shared by the rate limiter and the auth service.
//!
//! Bucket refill math, session activity timestamps and token lifetimes all
//! read time through [`Clock`], so tests can drive them with [`ManualClock`]
//! instead of sleeping.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> i64 {
        i64::try_from(self.now_millis() / 1000).unwrap_or(i64::MAX)
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.now_millis()).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// A clock frozen at the current system time.
    pub fn starting_now() -> Arc<Self> {
        Arc::new(Self::new(SystemClock.now_millis()))
    }

    pub fn advance(&self, by: Duration) {
        let delta = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Shared handle used by every component.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the production clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
