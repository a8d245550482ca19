//! Integration tests for the on-disk log format
//!
//! Sessions write through `FileSink`; files are read back with `LogReader`
//! under the format negotiation rules.

use input_audit::capture::{CaptureAll, CaptureContext, Event, EventKind, RawEvent};
use input_audit::codec::record::{dequantize_pressure, quantize_pressure};
use input_audit::codec::{decode, encode, encode_as, CodecError, FormatParams, FormatVersion};
use input_audit::storage::{list_logs, FileSink, LogHeader, LogReader, SinkError, StorageSink};
use input_audit::time::SessionClock;
use input_audit::workflow::{CaptureSession, SessionConfig};
use input_audit::writer::{RetryPolicy, WriterConfig};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn press(time: f64, pressure: f64) -> RawEvent {
    RawEvent::Mouse {
        time,
        x: 100.0,
        y: 200.0,
        pressure,
        button: 0,
        clicks: 1,
        subtype: 0,
        down: true,
        moving: false,
    }
}

/// Record one short session into `dir` and return the sink
fn record_session(dir: &Path, clock: SessionClock) -> FileSink {
    let sink = FileSink::create(dir, &clock).unwrap();
    let (session, mut source) = CaptureSession::start(&SessionConfig::default(), sink, CaptureAll, clock).unwrap();
    let ctx = CaptureContext::default();

    source.on_raw_event(&press(0.25, 0.5), &ctx);
    for (i, c) in "ok\r".encode_utf16().enumerate() {
        let time = 0.5 + i as f64 * 0.1;
        for down in [true, false] {
            source.on_raw_event(
                &RawEvent::Key {
                    time,
                    keycode: 0x24,
                    character: c,
                    keyboard: 40,
                    autorepeat: false,
                    down,
                },
                &ctx,
            );
        }
    }
    source.on_raw_event(&RawEvent::Wheel { time: 1.0, dx: 0, dy: -3 }, &ctx);

    session.shutdown().unwrap().sink
}

fn write_raw(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_session_writes_one_file_per_table() {
    let dir = TempDir::new().unwrap();
    let clock = SessionClock::start();
    let sink = record_session(dir.path(), clock);

    let logs = list_logs(dir.path()).unwrap();
    assert_eq!(logs.len(), 3);
    for table in EventKind::ALL {
        assert!(logs.contains(&sink.path_for(table)));
    }

    let keys = LogReader::open(sink.path_for(EventKind::Key)).unwrap();
    assert_eq!(keys.table(), EventKind::Key);
    assert_eq!(keys.len(), 6);
    assert_eq!(keys.header().version(), FormatVersion::CURRENT);
    assert_eq!(keys.header().epoch_unix, clock.epoch_unix());
    assert_eq!(keys.torn_tail_bytes(), 0);

    let wheel = LogReader::open(sink.path_for(EventKind::Wheel)).unwrap().scan().unwrap();
    assert_eq!(wheel.records, 1);
    assert_eq!(wheel.sequence_gaps, None);
}

#[test]
fn test_half_pressure_survives_disk() {
    let dir = TempDir::new().unwrap();
    let sink = record_session(dir.path(), SessionClock::start());

    let reader = LogReader::open(sink.path_for(EventKind::Mouse)).unwrap();
    let records: Vec<_> = reader.decoded().collect::<Result<_, _>>().unwrap();
    assert_eq!(records.len(), 1);
    match records[0].event {
        Event::Mouse(m) => {
            assert_eq!(m.x, 100);
            assert_eq!(m.y, 200);
            assert!(m.down);
            assert_eq!(m.button, 0);
            assert_eq!(m.clicks, 1);
            assert_eq!(m.pressure, dequantize_pressure(quantize_pressure(0.5)));
            assert!((m.pressure - 0.5).abs() <= 0.5 / 65535.0);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_current_records_refused_as_v1() {
    let dir = TempDir::new().unwrap();
    let sink = record_session(dir.path(), SessionClock::start());

    let result = LogReader::open_as(sink.path_for(EventKind::Wheel), Some(FormatVersion::V1));
    assert!(matches!(
        result,
        Err(SinkError::Codec(CodecError::VersionMismatch {
            stored: FormatVersion::V2,
            declared: FormatVersion::V1,
        }))
    ));

    // Without a header, the width alone refuses the decode
    let bytes = encode(&Event::Wheel(input_audit::WheelEvent { time: 1.0, dx: 2, dy: 3 }));
    assert_eq!(
        decode(&bytes, EventKind::Wheel, FormatVersion::V1),
        Err(CodecError::SizeMismatch {
            expected: 12,
            actual: 16
        })
    );
}

#[test]
fn test_unsupported_version_tag() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wheel-x.evlog");
    let mut header = LogHeader::current(EventKind::Wheel, 0.0).to_bytes();
    header[4] = 9;
    write_raw(&path, &header);

    assert!(matches!(
        LogReader::open(&path),
        Err(SinkError::Codec(CodecError::UnsupportedFormat { tag: 9 }))
    ));
}

#[test]
fn test_v1_log_is_readable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("key-legacy.evlog");
    let header = LogHeader {
        params: FormatParams::from(FormatVersion::V1),
        kind: EventKind::Key,
        epoch_unix: 1_600_000_000.0,
    };
    let event = Event::Key(input_audit::KeyEvent {
        time: 3600.123456,
        keycode: 0x0C,
        character: 'q' as u16,
        keyboard: 40,
        autorepeat: true,
        down: true,
    });
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend(encode_as(&event, FormatVersion::V1));
    write_raw(&path, &bytes);

    let reader = LogReader::open_as(&path, Some(FormatVersion::V1)).unwrap();
    assert_eq!(reader.header().params.width, 12);
    let decoded = reader.decoded().next().unwrap().unwrap().event;
    match decoded {
        Event::Key(k) => {
            assert_eq!(k.character, 'q' as u16);
            assert!(k.autorepeat);
            assert!((k.time - 3600.123456).abs() <= 3600.123456 * f32::EPSILON as f64);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_torn_tail_ignored_then_cut_on_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = SessionClock::start();
    let sink = record_session(dir.path(), clock);
    let path = sink.path_for(EventKind::Key);
    drop(sink);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 5]).unwrap();
    drop(file);

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.len(), 6);
    assert_eq!(reader.torn_tail_bytes(), 5);
    assert_eq!(reader.scan().unwrap().torn_tail_bytes, 5);

    let mut sink = FileSink::open(dir.path(), clock.session_id(), clock.epoch_unix()).unwrap();
    let extra = encode(&Event::Key(input_audit::KeyEvent {
        time: 9.0,
        keycode: 1,
        character: 'z' as u16,
        keyboard: 40,
        autorepeat: false,
        down: true,
    }));
    assert_eq!(sink.append_batch(EventKind::Key, &[extra]).unwrap(), 1);
    sink.flush().unwrap();

    let reader = LogReader::open(&path).unwrap();
    assert_eq!(reader.len(), 7);
    assert_eq!(reader.torn_tail_bytes(), 0);
}

#[test]
fn test_renamed_file_kind_mismatch() {
    let dir = TempDir::new().unwrap();
    let sink = record_session(dir.path(), SessionClock::start());
    let renamed = dir.path().join("mouse-renamed.evlog");
    std::fs::copy(sink.path_for(EventKind::Wheel), &renamed).unwrap();

    assert!(matches!(
        LogReader::open(&renamed),
        Err(SinkError::Codec(CodecError::KindMismatch {
            stored: EventKind::Wheel,
            requested: EventKind::Mouse,
        }))
    ));
}

#[test]
fn test_reopen_refuses_foreign_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mouse-s1.evlog");
    write_raw(&path, &LogHeader::current(EventKind::Key, 0.0).to_bytes());

    let mut sink = FileSink::open(dir.path(), "s1", 0.0).unwrap();
    let record = encode(&Event::Wheel(input_audit::WheelEvent { time: 0.0, dx: 0, dy: 0 }));
    assert!(matches!(
        sink.append_batch(EventKind::Mouse, &[record]),
        Err(SinkError::Header(_))
    ));
}

#[cfg(target_os = "linux")]
#[test]
fn test_full_disk_counts_records_lost_not_written() {
    let full = Path::new("/dev/full");
    if !full.exists() {
        return;
    }
    let dir = TempDir::new().unwrap();
    let clock = SessionClock::start();
    let sink = FileSink::create(dir.path(), &clock).unwrap();
    std::os::unix::fs::symlink(full, sink.path_for(EventKind::Wheel)).unwrap();

    let config = SessionConfig {
        writer: WriterConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..WriterConfig::default()
        },
        ..SessionConfig::default()
    };
    let (session, mut source) = CaptureSession::start(&config, sink, CaptureAll, clock).unwrap();
    let ctx = CaptureContext::default();
    for i in 0..20 {
        source.on_raw_event(&RawEvent::Wheel { time: i as f64, dx: 0, dy: i }, &ctx);
    }
    source.on_raw_event(&press(30.0, 0.0), &ctx);
    drop(source);

    let counters = session.shutdown().unwrap().counters;
    assert_eq!(counters.writer.records_lost, 20);
    assert_eq!(counters.writer.records_written, 1);
    assert_eq!(counters.source.captured, counters.writer.records_written + counters.total_lost());
}
