//! Synthetic event source
//!
//! Deterministic stand-in for the host event tap: mouse traces a circle,
//! clicks every so often, types a fixed phrase and scrolls. Used for demo
//! recording on hosts without an event tap, and by load tests.

use crate::capture::control::CancelToken;
use crate::capture::source::{CaptureOutcome, CaptureSource};
use crate::capture::types::{CaptureContext, RawEvent};
use crate::time::SessionClock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PHRASE: &str = "the quick brown fox jumps over the lazy dog\r";

/// Pacing granularity of the generator thread
const TICK: Duration = Duration::from_millis(1);

/// Deterministic event pattern
#[derive(Debug, Clone)]
pub struct SyntheticPattern {
    step: u64,
    phrase: Vec<u16>,
    key_index: usize,
    key_down: bool,
}

impl Default for SyntheticPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticPattern {
    pub fn new() -> Self {
        Self {
            step: 0,
            phrase: PHRASE.encode_utf16().collect(),
            key_index: 0,
            key_down: true,
        }
    }

    /// The event for the next step, stamped `time`
    pub fn next_event(&mut self, time: f64) -> RawEvent {
        let step = self.step;
        self.step += 1;

        match step % 10 {
            // Key strokes: alternate down and up for each character
            3 | 7 => self.next_key(time),
            9 => RawEvent::Wheel {
                time,
                dx: 0,
                dy: if (step / 10) % 2 == 0 { -3 } else { 3 },
            },
            5 => {
                let (x, y) = self.position(step);
                RawEvent::Mouse {
                    time,
                    x,
                    y,
                    pressure: 1.0,
                    button: 0,
                    clicks: 1,
                    subtype: 0,
                    down: (step / 10) % 2 == 0,
                    moving: false,
                }
            }
            _ => {
                let (x, y) = self.position(step);
                RawEvent::Mouse {
                    time,
                    x,
                    y,
                    pressure: 0.0,
                    button: 0,
                    clicks: 0,
                    subtype: 0,
                    down: false,
                    moving: true,
                }
            }
        }
    }

    fn next_key(&mut self, time: f64) -> RawEvent {
        let character = self.phrase[self.key_index];
        let down = self.key_down;
        if !down {
            self.key_index = (self.key_index + 1) % self.phrase.len();
        }
        self.key_down = !down;
        RawEvent::Key {
            time,
            keycode: character as i64,
            character,
            keyboard: 40,
            autorepeat: false,
            down,
        }
    }

    fn position(&self, step: u64) -> (f64, f64) {
        let angle = (step % 360) as f64 * std::f64::consts::PI / 180.0;
        (640.0 + 200.0 * angle.cos(), 400.0 + 200.0 * angle.sin())
    }
}

/// Feed `source` at `rate` events per second until `cancel` fires or
/// `limit` events have been delivered. Returns the number delivered.
pub fn run_synthetic(
    mut source: CaptureSource,
    clock: SessionClock,
    rate: f64,
    limit: Option<u64>,
    cancel: CancelToken,
) -> u64 {
    let mut pattern = SyntheticPattern::new();
    let start = Instant::now();
    let mut delivered = 0u64;
    let ctx = CaptureContext::default();

    info!("Synthetic source running at {:.0} events/s", rate);
    loop {
        let mut due = (start.elapsed().as_secs_f64() * rate) as u64;
        if let Some(limit) = limit {
            due = due.min(limit);
        }
        while delivered < due {
            let event = pattern.next_event(clock.now_secs());
            if source.on_raw_event(&event, &ctx) == CaptureOutcome::Stopped {
                debug!("Synthetic source stopped by shutdown");
                return delivered;
            }
            delivered += 1;
        }
        if limit.is_some_and(|l| delivered >= l) || cancel.wait_timeout(TICK) {
            break;
        }
    }
    info!("Synthetic source delivered {} events", delivered);
    delivered
}

/// [`run_synthetic`] on a dedicated `synthetic-source` thread
pub fn spawn_synthetic(
    source: CaptureSource,
    clock: SessionClock,
    rate: f64,
    limit: Option<u64>,
    cancel: CancelToken,
) -> crate::Result<JoinHandle<u64>> {
    let handle = thread::Builder::new()
        .name("synthetic-source".into())
        .spawn(move || run_synthetic(source, clock, rate, limit, cancel))?;
    Ok(handle)
}
