//! Session Clock
//!
//! Pairs a wall-clock reference epoch with a monotonic origin so event
//! times stay small, precise and immune to wall-clock adjustments during
//! a session.

use chrono::{DateTime, TimeZone, Utc};
use std::time::{Duration, Instant};

/// Format of session identifiers embedded in log file names
pub const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Reference epoch plus monotonic origin for one capture session
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started_at: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    /// Start a clock at the current instant
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            origin: Instant::now(),
        }
    }

    /// Start a clock whose epoch is pinned to `started_at`
    pub fn with_start(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            origin: Instant::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Unix seconds corresponding to `time == 0`
    pub fn epoch_unix(&self) -> f64 {
        self.started_at.timestamp() as f64
            + self.started_at.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
    }

    /// Identifier used to name this session's log files
    pub fn session_id(&self) -> String {
        self.started_at.format(SESSION_ID_FORMAT).to_string()
    }

    /// Seconds since the epoch, now
    #[inline]
    pub fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Seconds since the epoch at `instant`. Negative for instants before
    /// the session started.
    #[inline]
    pub fn since_instant(&self, instant: Instant) -> f64 {
        match instant.checked_duration_since(self.origin) {
            Some(d) => d.as_secs_f64(),
            None => -self.origin.duration_since(instant).as_secs_f64(),
        }
    }

    /// Elapsed monotonic time since the session started
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Converts host event timestamps (nanoseconds on the host's own
/// monotonic clock) into session seconds.
#[derive(Debug, Clone, Copy)]
pub struct HostAnchor {
    host_nanos: u64,
    session_secs: f64,
}

impl HostAnchor {
    /// Anchor host time `host_now_nanos` to the clock's current reading
    pub fn new(clock: &SessionClock, host_now_nanos: u64) -> Self {
        Self {
            host_nanos: host_now_nanos,
            session_secs: clock.now_secs(),
        }
    }

    /// Session seconds for a host timestamp
    #[inline]
    pub fn to_session_secs(&self, host_nanos: u64) -> f64 {
        let delta = host_nanos as i128 - self.host_nanos as i128;
        self.session_secs + delta as f64 / 1_000_000_000.0
    }
}

/// Wall-clock time of a record stamped `secs` in a log with `epoch_unix`
pub fn wall_time(epoch_unix: f64, secs: f64) -> Option<DateTime<Utc>> {
    let total = epoch_unix + secs;
    if !total.is_finite() {
        return None;
    }
    let whole = total.floor();
    let nanos = ((total - whole) * 1_000_000_000.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}
