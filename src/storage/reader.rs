//! Log Reader
//!
//! Reads historical log files, whatever version wrote them. The header's
//! version tag goes through the format negotiator before any record is
//! touched; a trailing partial record is ignored and reported.

use super::file_log::{parse_file_name, LogHeader, HEADER_LEN, LOG_EXTENSION};
use super::SinkError;
use crate::capture::sequence::GapTracker;
use crate::capture::types::{Event, EventKind};
use crate::codec::{decode, CodecError, FormatParams, FormatVersion};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// One decoded record plus what the reader inferred about it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecodedRecord {
    pub event: Event,
    /// Time is behind the latest time earlier in the file
    pub clock_anomaly: bool,
    /// Events missing immediately before this one, as far as the kind's
    /// wire sequence can tell
    pub missing_before: u32,
}

/// Whole-file statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    pub path: Option<PathBuf>,
    pub table: EventKind,
    pub format: FormatParams,
    pub epoch_unix: f64,
    pub records: usize,
    pub torn_tail_bytes: usize,
    /// Only tables that persist a sequence number report gaps
    pub sequence_gaps: Option<u64>,
    pub lost_by_sequence: Option<u64>,
    pub clock_anomalies: u64,
    pub first_time: Option<f64>,
    pub last_time: Option<f64>,
}

/// A fully loaded, validated log file
#[derive(Debug, Clone)]
pub struct LogReader {
    path: Option<PathBuf>,
    header: LogHeader,
    body: Vec<u8>,
    torn_tail: usize,
}

impl LogReader {
    /// Open a log, trusting its header's version tag
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::open_as(path, None)
    }

    /// Open a log the caller believes was written by `declared`. A header
    /// that says otherwise is refused.
    pub fn open_as(path: impl AsRef<Path>, declared: Option<FormatVersion>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let mut reader = Self::from_bytes(bytes, declared)?;
        if let Some((kind, _)) = parse_file_name(path) {
            if kind != reader.header.kind {
                return Err(CodecError::KindMismatch {
                    stored: reader.header.kind,
                    requested: kind,
                }
                .into());
            }
        }
        reader.path = Some(path.to_path_buf());
        Ok(reader)
    }

    pub fn from_bytes(mut bytes: Vec<u8>, declared: Option<FormatVersion>) -> Result<Self, SinkError> {
        let header = LogHeader::parse(&bytes, declared)?;
        let mut body = bytes.split_off(HEADER_LEN);
        let torn_tail = body.len() % header.params.width;
        body.truncate(body.len() - torn_tail);
        Ok(Self {
            path: None,
            header,
            body,
            torn_tail,
        })
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn table(&self) -> EventKind {
        self.header.kind
    }

    /// Number of whole records
    pub fn len(&self) -> usize {
        self.body.len() / self.header.params.width
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Bytes after the last whole record
    pub fn torn_tail_bytes(&self) -> usize {
        self.torn_tail
    }

    /// Raw record bytes in file order
    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.body.chunks_exact(self.header.params.width)
    }

    /// Decoded records in file order, with anomaly and gap annotations
    pub fn decoded(&self) -> impl Iterator<Item = Result<DecodedRecord, CodecError>> + '_ {
        let kind = self.header.kind;
        let version = self.header.params.version;
        let mut latest: Option<f64> = None;
        let mut gaps = GapTracker::new(kind);

        self.records().map(move |bytes| {
            let event = decode(bytes, kind, version)?;
            let time = event.time();
            // Behind the latest time so far, as at capture
            let clock_anomaly = matches!(latest, Some(latest) if time < latest);
            if !clock_anomaly {
                latest = Some(time);
            }
            let missing_before = match event {
                Event::Mouse(m) => gaps.observe(m.sequence as u32),
                _ => 0,
            };
            Ok(DecodedRecord {
                event,
                clock_anomaly,
                missing_before,
            })
        })
    }

    /// Decode everything and summarize
    pub fn scan(&self) -> Result<LogSummary, CodecError> {
        let mut summary = LogSummary {
            path: self.path.clone(),
            table: self.header.kind,
            format: self.header.params,
            epoch_unix: self.header.epoch_unix,
            records: 0,
            torn_tail_bytes: self.torn_tail,
            sequence_gaps: None,
            lost_by_sequence: None,
            clock_anomalies: 0,
            first_time: None,
            last_time: None,
        };
        let sequenced = self.header.kind == EventKind::Mouse;
        let (mut gaps, mut lost) = (0u64, 0u64);

        for record in self.decoded() {
            let record = record?;
            let time = record.event.time();
            summary.records += 1;
            summary.first_time.get_or_insert(time);
            summary.last_time = Some(time);
            if record.clock_anomaly {
                summary.clock_anomalies += 1;
            }
            if record.missing_before > 0 {
                gaps += 1;
                lost += record.missing_before as u64;
            }
        }

        if sequenced {
            summary.sequence_gaps = Some(gaps);
            summary.lost_by_sequence = Some(lost);
        }
        Ok(summary)
    }
}

/// Log files in `dir`, sorted by name (table, then session)
pub fn list_logs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, SinkError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == LOG_EXTENSION))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{KeyEvent, MouseEvent, WheelEvent};
    use crate::codec::{encode_as, FormatParams};

    fn log_bytes(kind: EventKind, version: FormatVersion, events: &[Event]) -> Vec<u8> {
        let header = LogHeader {
            params: FormatParams::from(version),
            kind,
            epoch_unix: 1_000.0,
        };
        let mut bytes = header.to_bytes().to_vec();
        for event in events {
            bytes.extend(encode_as(event, version));
        }
        bytes
    }

    fn mouse(time: f64, sequence: u8) -> Event {
        Event::Mouse(MouseEvent {
            time,
            x: 1,
            y: 2,
            pressure: 0.0,
            sequence,
            button: 0,
            clicks: 0,
            subtype: 0,
            down: false,
            moving: true,
        })
    }

    #[test]
    fn test_reads_v1_logs() {
        let events = [Event::Key(KeyEvent {
            time: 0.5,
            keycode: 4,
            character: 'h' as u16,
            keyboard: 40,
            autorepeat: false,
            down: true,
        })];
        let reader = LogReader::from_bytes(log_bytes(EventKind::Key, FormatVersion::V1, &events), None).unwrap();
        assert_eq!(reader.header().version(), FormatVersion::V1);
        assert_eq!(reader.len(), 1);
        let decoded: Vec<_> = reader.decoded().collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded[0].event, events[0]);
    }

    #[test]
    fn test_declared_version_must_match_header() {
        let bytes = log_bytes(EventKind::Wheel, FormatVersion::V2, &[]);
        assert!(matches!(
            LogReader::from_bytes(bytes, Some(FormatVersion::V1)),
            Err(SinkError::Codec(CodecError::VersionMismatch {
                stored: FormatVersion::V2,
                declared: FormatVersion::V1
            }))
        ));
    }

    #[test]
    fn test_torn_tail_is_ignored_and_reported() {
        let event = Event::Wheel(WheelEvent { time: 1.0, dx: 0, dy: 1 });
        let mut bytes = log_bytes(EventKind::Wheel, FormatVersion::V2, &[event, event]);
        bytes.extend([0u8; 7]);

        let reader = LogReader::from_bytes(bytes, None).unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.torn_tail_bytes(), 7);
        assert_eq!(reader.scan().unwrap().torn_tail_bytes, 7);
    }

    #[test]
    fn test_every_record_behind_latest_time_is_flagged() {
        let events = [5.0, 4.0, 4.5, 6.0].map(|time| Event::Wheel(WheelEvent { time, dx: 0, dy: 0 }));
        let reader = LogReader::from_bytes(log_bytes(EventKind::Wheel, FormatVersion::V2, &events), None).unwrap();

        let flags: Vec<bool> = reader.decoded().map(|r| r.unwrap().clock_anomaly).collect();
        assert_eq!(flags, vec![false, true, true, false]);
        assert_eq!(reader.scan().unwrap().clock_anomalies, 2);
    }

    #[test]
    fn test_scan_reports_gaps_and_anomalies() {
        let events = [mouse(1.0, 254), mouse(2.0, 255), mouse(1.5, 2), mouse(3.0, 3)];
        let reader = LogReader::from_bytes(log_bytes(EventKind::Mouse, FormatVersion::V2, &events), None).unwrap();

        let decoded: Vec<_> = reader.decoded().collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded[2].missing_before, 2);
        assert!(decoded[2].clock_anomaly);
        assert!(!decoded[3].clock_anomaly);

        let summary = reader.scan().unwrap();
        assert_eq!(summary.records, 4);
        assert_eq!(summary.sequence_gaps, Some(1));
        assert_eq!(summary.lost_by_sequence, Some(2));
        assert_eq!(summary.clock_anomalies, 1);
        assert_eq!(summary.first_time, Some(1.0));
        assert_eq!(summary.last_time, Some(3.0));
    }

    #[test]
    fn test_unsequenced_tables_report_no_gaps() {
        let bytes = log_bytes(EventKind::Wheel, FormatVersion::V2, &[]);
        let summary = LogReader::from_bytes(bytes, None).unwrap().scan().unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(summary.sequence_gaps, None);
        assert_eq!(summary.first_time, None);
    }

    #[test]
    fn test_list_logs_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("wheel-a.evlog"), b"").unwrap();
        fs::write(dir.path().join("key-a.evlog"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let names: Vec<String> = list_logs(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["key-a.evlog", "wheel-a.evlog"]);
    }

    #[test]
    fn test_file_name_must_match_header_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mouse-a.evlog");
        fs::write(&path, log_bytes(EventKind::Wheel, FormatVersion::V2, &[])).unwrap();
        assert!(matches!(
            LogReader::open(&path),
            Err(SinkError::Codec(CodecError::KindMismatch { .. }))
        ));
    }
}
