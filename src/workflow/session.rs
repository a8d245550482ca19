//! Capture Session
//!
//! Wires a capture buffer, a capture source and a persistence writer thread
//! around one storage sink, and owns the writer thread's lifetime.

use crate::capture::control::{CaptureControl, CaptureCounters};
use crate::capture::ring_buffer::{CaptureBuffer, OverflowPolicy, DEFAULT_CAPACITY};
use crate::capture::source::{CapturePolicy, CaptureSource};
use crate::codec::verify_layouts;
use crate::storage::StorageSink;
use crate::time::SessionClock;
use crate::writer::{PersistenceWriter, WriterConfig, WriterStats};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Everything needed to start a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capture buffer capacity in records (power of two)
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub writer: WriterConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::DropNewest,
            writer: WriterConfig::default(),
        }
    }
}

/// What a finished session hands back
#[derive(Debug)]
pub struct SessionOutcome<S> {
    pub sink: S,
    pub counters: CaptureCounters,
    pub duration: Duration,
}

/// A running capture session.
///
/// [`start`](CaptureSession::start) returns the session together with the
/// [`CaptureSource`] that the event-delivery context must own.
pub struct CaptureSession<S: StorageSink + 'static> {
    control: CaptureControl,
    clock: SessionClock,
    writer: Option<JoinHandle<S>>,
}

impl<S: StorageSink + 'static> CaptureSession<S> {
    /// Verify layouts, build the pipeline and spawn the writer.
    ///
    /// Fails without spawning anything if the record layouts disagree or
    /// the configuration is unusable.
    pub fn start<P>(
        config: &SessionConfig,
        sink: S,
        policy: P,
        clock: SessionClock,
    ) -> crate::Result<(Self, CaptureSource)>
    where
        P: CapturePolicy + 'static,
    {
        verify_layouts()?;
        if !config.capacity.is_power_of_two() {
            return Err(crate::Error::Config(format!(
                "capture buffer capacity {} is not a power of two",
                config.capacity
            )));
        }

        let buffer = CaptureBuffer::with_capacity(config.capacity).with_policy(config.overflow);
        let control = CaptureControl::new(buffer.stats(), Arc::new(WriterStats::default()));
        let (producer, consumer) = buffer.split();

        let writer = PersistenceWriter::new(consumer, sink, control.clone(), config.writer).spawn()?;
        let source = CaptureSource::with_policy(producer, control.clone(), policy);

        info!(
            "Capture session {} started (buffer {}, {:?})",
            clock.session_id(),
            config.capacity,
            config.overflow
        );

        Ok((
            Self {
                control,
                clock,
                writer: Some(writer),
            },
            source,
        ))
    }

    /// Handle for steering the session from other threads
    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn enable(&self) {
        self.control.enable();
    }

    pub fn disable(&self) {
        self.control.disable();
    }

    pub fn is_enabled(&self) -> bool {
        self.control.is_enabled()
    }

    pub fn request_flush(&self) {
        self.control.request_flush();
    }

    pub fn counters(&self) -> CaptureCounters {
        self.control.counters()
    }

    /// Stop accepting events, let the writer drain and flush, and return
    /// the sink with final counters.
    ///
    /// A producer still running past this point has its records refused
    /// and counted as drops. Stop the event feed first to keep them.
    pub fn shutdown(mut self) -> crate::Result<SessionOutcome<S>> {
        self.control.shutdown();
        let handle = self
            .writer
            .take()
            .ok_or_else(|| crate::Error::Capture("session already shut down".into()))?;
        let sink = handle
            .join()
            .map_err(|_| crate::Error::Capture("persistence writer panicked".into()))?;

        let counters = self.control.counters();
        let duration = self.clock.elapsed();
        info!(
            "Capture session {} finished after {:.1}s: {} captured, {} written, {} lost",
            self.clock.session_id(),
            duration.as_secs_f64(),
            counters.source.captured,
            counters.writer.records_written,
            counters.total_lost()
        );
        Ok(SessionOutcome {
            sink,
            counters,
            duration,
        })
    }
}

impl<S: StorageSink + 'static> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.writer.take() {
            self.control.shutdown();
            if handle.join().is_err() {
                warn!("Persistence writer panicked during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::CaptureAll;
    use crate::capture::types::{CaptureContext, EventKind, RawEvent};
    use crate::storage::MemorySink;

    #[test]
    fn test_rejects_non_power_of_two_capacity() {
        let config = SessionConfig {
            capacity: 1000,
            ..SessionConfig::default()
        };
        let result = CaptureSession::start(&config, MemorySink::new(), CaptureAll, SessionClock::start());
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_events_reach_sink_on_shutdown() {
        let sink = MemorySink::new();
        let (session, mut source) =
            CaptureSession::start(&SessionConfig::default(), sink.clone(), CaptureAll, SessionClock::start()).unwrap();

        for i in 0..10 {
            source.on_raw_event(
                &RawEvent::Wheel {
                    time: i as f64,
                    dx: 0,
                    dy: i,
                },
                &CaptureContext::default(),
            );
        }

        let outcome = session.shutdown().unwrap();
        assert_eq!(sink.len(EventKind::Wheel), 10);
        assert_eq!(outcome.counters.source.captured, 10);
        assert_eq!(outcome.counters.writer.records_written, 10);
        assert_eq!(outcome.counters.total_lost(), 0);
    }

    #[test]
    fn test_disable_is_visible_through_session() {
        let (session, mut source) =
            CaptureSession::start(&SessionConfig::default(), MemorySink::new(), CaptureAll, SessionClock::start())
                .unwrap();
        session.disable();
        assert!(!session.is_enabled());
        source.on_raw_event(&RawEvent::Wheel { time: 0.0, dx: 0, dy: 0 }, &CaptureContext::default());
        assert_eq!(session.counters().source.ignored_while_disabled, 1);
        drop(session);
        assert!(source.control().is_shutdown());
    }
}
