//! Injectable wall clock.

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// Token expiry, `synced_at` stamps and default ranges all read time through
/// this trait so tests can pin it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
