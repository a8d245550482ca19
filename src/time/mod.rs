//! Session timekeeping
//!
//! Record timestamps are seconds since a per-log reference epoch. The
//! epoch is captured once, from the wall clock, when a session starts;
//! everything after that is measured on the monotonic clock.

pub mod clock;

pub use clock::{wall_time, HostAnchor, SessionClock};
