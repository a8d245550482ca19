//! Integration tests for the capture pipeline
//!
//! These tests drive the whole path:
//! Event source -> Capture buffer -> Persistence writer -> Storage sink

use input_audit::capture::{
    CaptureAll, CaptureBuffer, CaptureContext, CaptureControl, CaptureOutcome, CaptureSource, Event,
    EventKind, ExemptProcesses, GapTracker, RawEvent,
};
use input_audit::storage::MemorySink;
use input_audit::time::SessionClock;
use input_audit::workflow::{spawn_synthetic, CaptureSession, SessionConfig};
use input_audit::writer::{RetryPolicy, WriterConfig, WriterStats};
use std::sync::Arc;
use std::time::Duration;

fn wheel(time: f64, dy: i64) -> RawEvent {
    RawEvent::Wheel { time, dx: 0, dy }
}

fn mouse_move(time: f64, x: f64) -> RawEvent {
    RawEvent::Mouse {
        time,
        x,
        y: 0.0,
        pressure: 0.0,
        button: 0,
        clicks: 0,
        subtype: 0,
        down: false,
        moving: true,
    }
}

fn key(time: f64, character: char, down: bool) -> RawEvent {
    RawEvent::Key {
        time,
        keycode: character as i64,
        character: character as u16,
        keyboard: 40,
        autorepeat: false,
        down,
    }
}

/// A source over a bare buffer, without a writer
fn bare_source(capacity: usize) -> (CaptureSource, input_audit::capture::RecordConsumer, CaptureControl) {
    let buffer = CaptureBuffer::with_capacity(capacity);
    let control = CaptureControl::new(buffer.stats(), Arc::new(WriterStats::default()));
    let (producer, consumer) = buffer.split();
    (CaptureSource::new(producer, control.clone()), consumer, control)
}

fn fast_retry_config(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        writer: WriterConfig {
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            ..WriterConfig::default()
        },
        ..SessionConfig::default()
    }
}

#[test]
fn test_mixed_kinds_keep_per_table_order() {
    let sink = MemorySink::new();
    let (session, mut source) =
        CaptureSession::start(&SessionConfig::default(), sink.clone(), CaptureAll, SessionClock::start()).unwrap();
    let ctx = CaptureContext::default();

    for i in 0..300 {
        let t = i as f64 * 0.001;
        let event = match i % 3 {
            0 => mouse_move(t, i as f64),
            1 => key(t, 'a', i % 2 == 0),
            _ => wheel(t, i),
        };
        assert!(matches!(source.on_raw_event(&event, &ctx), CaptureOutcome::Enqueued { .. }));
    }

    let outcome = session.shutdown().unwrap();
    assert_eq!(outcome.counters.writer.records_written, 300);

    let mice = sink.events(EventKind::Mouse).unwrap();
    assert_eq!(mice.len(), 100);
    for (n, event) in mice.iter().enumerate() {
        match event {
            Event::Mouse(m) => {
                assert_eq!(m.x, (n * 3) as i16);
                assert_eq!(m.sequence, n as u8);
            }
            other => panic!("unexpected {:?} in mouse table", other),
        }
    }

    let wheels = sink.events(EventKind::Wheel).unwrap();
    let dys: Vec<i32> = wheels
        .iter()
        .map(|e| match e {
            Event::Wheel(w) => w.dy,
            other => panic!("unexpected {:?} in wheel table", other),
        })
        .collect();
    let expected: Vec<i32> = (0..300).filter(|i| i % 3 == 2).collect();
    assert_eq!(dys, expected);

    let times: Vec<f64> = sink.events(EventKind::Key).unwrap().iter().map(Event::time).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_full_buffer_rejects_newest_wheel() {
    let (mut source, mut consumer, _control) = bare_source(8);
    let ctx = CaptureContext::default();

    for i in 0..8 {
        assert_eq!(
            source.on_raw_event(&wheel(i as f64, i), &ctx),
            CaptureOutcome::Enqueued { sequence: i as u32 }
        );
    }
    assert_eq!(
        source.on_raw_event(&wheel(8.0, 8), &ctx),
        CaptureOutcome::Dropped { sequence: 8 }
    );

    let stats = consumer.stats();
    assert_eq!(stats.snapshot().records_dropped, 1);
    assert_eq!(stats.dropped(EventKind::Wheel), 1);

    let drained = consumer.try_drain(16);
    let dys: Vec<i32> = drained
        .iter()
        .map(|r| match r.decode().unwrap() {
            Event::Wheel(w) => w.dy,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(dys, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_mouse_gaps_match_buffer_drops() {
    let (mut source, mut consumer, _control) = bare_source(4);
    let ctx = CaptureContext::default();
    let mut stored = Vec::new();

    // 4 fit, 3 are dropped, then the buffer drains and one more fits
    for i in 0..7 {
        source.on_raw_event(&mouse_move(i as f64, 0.0), &ctx);
    }
    stored.extend(consumer.try_drain(16));
    source.on_raw_event(&mouse_move(7.0, 0.0), &ctx);
    stored.extend(consumer.try_drain(16));

    let mut tracker = GapTracker::new(EventKind::Mouse);
    for record in &stored {
        if let Event::Mouse(m) = record.decode().unwrap() {
            tracker.observe(m.sequence as u32);
        }
    }
    assert_eq!(stored.len(), 5);
    assert_eq!(tracker.gaps(), 1);
    assert_eq!(tracker.lost(), consumer.stats().dropped(EventKind::Mouse));
    assert_eq!(tracker.lost(), 3);
}

#[test]
fn test_mouse_wire_sequence_wraps_without_gaps() {
    let sink = MemorySink::new();
    let (session, mut source) =
        CaptureSession::start(&SessionConfig::default(), sink.clone(), CaptureAll, SessionClock::start()).unwrap();
    let ctx = CaptureContext::default();
    for i in 0..600 {
        source.on_raw_event(&mouse_move(i as f64, 0.0), &ctx);
        // Pace the producer so the default buffer never fills
        if i % 200 == 199 {
            std::thread::sleep(Duration::from_millis(20));
        }
    }
    session.shutdown().unwrap();

    let mut tracker = GapTracker::new(EventKind::Mouse);
    for event in sink.events(EventKind::Mouse).unwrap() {
        if let Event::Mouse(m) = event {
            tracker.observe(m.sequence as u32);
        }
    }
    assert_eq!(sink.len(EventKind::Mouse), 600);
    assert_eq!(tracker.gaps(), 0);
}

#[test]
fn test_shutdown_accounts_for_every_event() {
    let sink = MemorySink::new();
    let clock = SessionClock::start();
    let config = SessionConfig {
        capacity: 1024,
        ..SessionConfig::default()
    };
    let (session, source) = CaptureSession::start(&config, sink.clone(), CaptureAll, clock).unwrap();

    let handle = spawn_synthetic(source, clock, 200_000.0, Some(20_000), session.control().cancel_token()).unwrap();
    let delivered = handle.join().unwrap();
    let outcome = session.shutdown().unwrap();
    let counters = outcome.counters;

    assert_eq!(delivered, 20_000);
    assert_eq!(counters.source.captured, delivered);
    assert_eq!(
        counters.source.captured,
        counters.writer.records_written + counters.total_lost()
    );
    assert_eq!(sink.total_len() as u64, counters.writer.records_written);
    assert_eq!(counters.buffer.records_consumed, counters.buffer.records_pushed);
}

#[test]
fn test_shutdown_with_live_producer_accounts_for_every_event() {
    for round in 0..50 {
        let sink = MemorySink::new();
        let config = SessionConfig {
            capacity: 64,
            ..SessionConfig::default()
        };
        let (session, mut source) =
            CaptureSession::start(&config, sink.clone(), CaptureAll, SessionClock::start()).unwrap();
        let control = session.control().clone();

        // Keeps pushing until the source reports the session stopped
        let producer = std::thread::spawn(move || {
            let ctx = CaptureContext::default();
            let mut i = 0i64;
            while source.on_raw_event(&wheel(i as f64, i), &ctx) != CaptureOutcome::Stopped {
                i += 1;
            }
        });
        std::thread::sleep(Duration::from_millis(1 + round % 3));

        let outcome = session.shutdown().unwrap();
        producer.join().unwrap();
        let counters = control.counters();

        assert!(counters.source.captured > 0);
        assert_eq!(
            counters.source.captured,
            counters.writer.records_written + counters.total_lost(),
            "round {}",
            round
        );
        assert_eq!(sink.total_len() as u64, counters.writer.records_written);
        assert_eq!(outcome.counters.writer, counters.writer);
    }
}

#[test]
fn test_failed_flush_does_not_hide_losses() {
    let sink = MemorySink::new();
    sink.fail_next_flush(1);
    let (session, mut source) =
        CaptureSession::start(&fast_retry_config(3), sink.clone(), CaptureAll, SessionClock::start()).unwrap();
    let ctx = CaptureContext::default();
    for i in 0..40 {
        source.on_raw_event(&wheel(i as f64, i), &ctx);
    }
    drop(source);

    let counters = session.shutdown().unwrap().counters;
    assert_eq!(counters.writer.flush_failures, 1);
    assert_eq!(counters.writer.records_written, sink.total_len() as u64);
    assert_eq!(counters.source.captured, counters.writer.records_written + counters.total_lost());
}

#[test]
fn test_transient_sink_failures_are_retried() {
    let sink = MemorySink::new();
    sink.fail_next(2);
    let (session, mut source) =
        CaptureSession::start(&fast_retry_config(5), sink.clone(), CaptureAll, SessionClock::start()).unwrap();
    let ctx = CaptureContext::default();
    for i in 0..50 {
        source.on_raw_event(&wheel(i as f64, i), &ctx);
    }

    let counters = session.shutdown().unwrap().counters;
    assert_eq!(sink.len(EventKind::Wheel), 50);
    assert_eq!(counters.writer.retries, 2);
    assert_eq!(counters.writer.records_lost, 0);
    assert_eq!(counters.writer.batches_failed, 0);
}

#[test]
fn test_unavailable_sink_loses_records_but_keeps_running() {
    let sink = MemorySink::new();
    sink.set_unavailable(true);
    let (session, mut source) =
        CaptureSession::start(&fast_retry_config(2), sink.clone(), CaptureAll, SessionClock::start()).unwrap();
    let ctx = CaptureContext::default();
    for i in 0..10 {
        source.on_raw_event(&key(i as f64, 'x', true), &ctx);
    }
    std::thread::sleep(Duration::from_millis(100));

    sink.set_unavailable(false);
    for i in 10..20 {
        source.on_raw_event(&key(i as f64, 'y', true), &ctx);
    }

    let counters = session.shutdown().unwrap().counters;
    assert_eq!(counters.source.captured, 20);
    assert_eq!(counters.writer.records_lost + counters.writer.records_written, 20);
    assert!(counters.writer.records_lost >= 1);
    assert!(counters.writer.batches_failed >= 1);
    assert_eq!(sink.len(EventKind::Key) as u64, counters.writer.records_written);
}

#[test]
fn test_exempt_process_never_reaches_sink() {
    let sink = MemorySink::new();
    let policy = ExemptProcesses::new(["ssh-askpass"]);
    let (session, mut source) =
        CaptureSession::start(&SessionConfig::default(), sink.clone(), policy, SessionClock::start()).unwrap();

    let secret = CaptureContext::for_process(Some(77), "/usr/libexec/ssh-askpass");
    let editor = CaptureContext::for_process(Some(78), "/usr/bin/vim");
    assert_eq!(source.on_raw_event(&key(0.0, 'p', true), &secret), CaptureOutcome::Exempt);
    assert!(matches!(
        source.on_raw_event(&key(1.0, 'v', true), &editor),
        CaptureOutcome::Enqueued { sequence: 0 }
    ));

    let counters = session.shutdown().unwrap().counters;
    assert_eq!(counters.source.exempted, 1);
    let typed: Vec<u16> = sink
        .events(EventKind::Key)
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Key(k) => Some(k.character),
            _ => None,
        })
        .collect();
    assert_eq!(typed, vec!['v' as u16]);
}

#[test]
fn test_backwards_clock_is_flagged_not_reordered() {
    let (mut source, mut consumer, control) = bare_source(16);
    let ctx = CaptureContext::default();
    source.on_raw_event(&wheel(5.0, 1), &ctx);
    source.on_raw_event(&wheel(4.0, 2), &ctx);
    source.on_raw_event(&wheel(4.5, 3), &ctx);
    source.on_raw_event(&wheel(6.0, 4), &ctx);

    let records = consumer.try_drain(16);
    let flags: Vec<bool> = records.iter().map(|r| r.clock_anomaly()).collect();
    assert_eq!(flags, vec![false, true, true, false]);
    let times: Vec<f64> = records.iter().map(|r| r.decode().unwrap().time()).collect();
    assert_eq!(times, vec![5.0, 4.0, 4.5, 6.0]);
    assert_eq!(control.counters().source.clock_anomalies, 2);
}
