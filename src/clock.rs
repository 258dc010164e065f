//! Injectable wall-clock source.
//!
//! Timestamps on presence records, latency samples, and readiness snapshots
//! all flow through a [`Clock`] so recency classification can be tested
//! deterministically without sleeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Wall-clock source.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared clock handle used throughout the core.
pub type SharedClock = Arc<dyn Clock>;

/// Returns the default system clock as a shared handle.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
