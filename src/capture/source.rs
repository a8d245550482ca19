//! Capture Source
//!
//! The host-facing entry point. Every raw event delivered by the host runs
//! through [`CaptureSource::on_raw_event`]: filter, normalize, tag, encode,
//! push. Nothing here blocks beyond the buffer's overflow bound.

use super::control::CaptureControl;
use super::ring_buffer::RecordProducer;
use super::sequence::{self, SequenceTagger};
use super::types::{CaptureContext, Event, RawEvent};
use crate::codec::EncodedRecord;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Clock anomalies past the first are only logged at `warn` every this many
const ANOMALY_WARN_EVERY: u64 = 1000;

/// Decides whether an event headed for a given target is recorded.
///
/// Closures of the right shape implement this directly.
pub trait CapturePolicy: Send {
    fn should_capture(&self, ctx: &CaptureContext<'_>) -> bool;
}

impl<F> CapturePolicy for F
where
    F: Fn(&CaptureContext<'_>) -> bool + Send,
{
    fn should_capture(&self, ctx: &CaptureContext<'_>) -> bool {
        self(ctx)
    }
}

/// Records everything
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureAll;

impl CapturePolicy for CaptureAll {
    fn should_capture(&self, _ctx: &CaptureContext<'_>) -> bool {
        true
    }
}

/// Skips events headed for named processes (e.g. a password prompt helper)
/// or for pids registered at runtime.
#[derive(Debug, Clone, Default)]
pub struct ExemptProcesses {
    names: Vec<String>,
    pids: Arc<RwLock<HashSet<i32>>>,
}

impl ExemptProcesses {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            pids: Arc::default(),
        }
    }

    /// Exempt a running process by pid
    pub fn exempt_pid(&self, pid: i32) {
        self.pids.write().insert(pid);
    }

    /// Resume recording for a pid
    pub fn release_pid(&self, pid: i32) {
        self.pids.write().remove(&pid);
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn name_matches(&self, process_name: &str) -> bool {
        // Hosts may report a full executable path
        let base = process_name.rsplit('/').next().unwrap_or(process_name);
        self.names.iter().any(|n| n == base || n == process_name)
    }
}

impl CapturePolicy for ExemptProcesses {
    fn should_capture(&self, ctx: &CaptureContext<'_>) -> bool {
        if let Some(name) = ctx.process_name {
            if self.name_matches(name) {
                return false;
            }
        }
        match ctx.pid {
            Some(pid) => !self.pids.read().contains(&pid),
            None => true,
        }
    }
}

/// What happened to one delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Encoded and accepted by the buffer
    Enqueued { sequence: u32 },
    /// Encoded, numbered, then dropped because the buffer was full
    Dropped { sequence: u32 },
    /// Rejected by the capture policy
    Exempt,
    /// Capture is disabled
    Disabled,
    /// The session is shutting down
    Stopped,
}

/// Producer-side pipeline owned by the event-delivery context
pub struct CaptureSource {
    producer: RecordProducer,
    tagger: SequenceTagger,
    policy: Box<dyn CapturePolicy>,
    control: CaptureControl,
    /// Latest time seen per kind
    latest_time: [Option<f64>; 3],
}

impl CaptureSource {
    pub fn new(producer: RecordProducer, control: CaptureControl) -> Self {
        Self::with_policy(producer, control, CaptureAll)
    }

    pub fn with_policy<P>(producer: RecordProducer, control: CaptureControl, policy: P) -> Self
    where
        P: CapturePolicy + 'static,
    {
        Self {
            producer,
            tagger: SequenceTagger::new(),
            policy: Box::new(policy),
            control,
            latest_time: [None; 3],
        }
    }

    /// Handle one event delivered by the host
    pub fn on_raw_event(&mut self, raw: &RawEvent, ctx: &CaptureContext<'_>) -> CaptureOutcome {
        let stats = self.control.source_stats();

        if self.control.is_shutdown() {
            return CaptureOutcome::Stopped;
        }
        if !self.control.is_enabled() {
            stats.ignored_while_disabled.fetch_add(1, Ordering::Relaxed);
            return CaptureOutcome::Disabled;
        }
        if !self.policy.should_capture(ctx) {
            stats.exempted.fetch_add(1, Ordering::Relaxed);
            return CaptureOutcome::Exempt;
        }

        let mut event = raw.normalize();
        let kind = event.kind();
        let sequence = self.tagger.next(kind);
        if let Event::Mouse(m) = &mut event {
            m.sequence = sequence::wire(kind, sequence) as u8;
        }

        let time = event.time();
        // Compared with the latest time so far, so every record of a
        // backwards run is flagged, not just the first
        let latest = self.latest_time[kind.index()];
        let anomaly = matches!(latest, Some(latest) if time < latest);
        if anomaly {
            let n = stats.clock_anomalies.fetch_add(1, Ordering::Relaxed) + 1;
            let latest = latest.unwrap_or(time);
            if n == 1 || n % ANOMALY_WARN_EVERY == 0 {
                warn!(
                    "Clock anomaly #{} on {}: {:.6} is before {:.6}",
                    n, kind, time, latest
                );
            } else {
                debug!("Clock anomaly on {}: {:.6} before {:.6}", kind, time, latest);
            }
        } else {
            self.latest_time[kind.index()] = Some(time);
        }

        stats.captured.fetch_add(1, Ordering::Relaxed);
        let record = EncodedRecord::new(&event, sequence, anomaly);
        if self.producer.push(record) {
            trace!("Captured {} #{} at {:.6}", kind, sequence, time);
            CaptureOutcome::Enqueued { sequence }
        } else {
            trace!("Capture buffer full, dropped {} #{}", kind, sequence);
            CaptureOutcome::Dropped { sequence }
        }
    }

    pub fn tagger(&self) -> &SequenceTagger {
        &self.tagger
    }

    pub fn control(&self) -> &CaptureControl {
        &self.control
    }
}
