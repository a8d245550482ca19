//! Human-readable rendering of decoded logs for the `dump`, `keys` and
//! `info` commands.

use crate::capture::types::{Event, KeyEvent};
use crate::storage::{DecodedRecord, LogSummary};
use crate::time::wall_time;
use std::fmt::Write;

/// One line per record
pub fn format_record(record: &DecodedRecord, epoch_unix: f64) -> String {
    let mut line = String::with_capacity(96);
    let time = record.event.time();
    match wall_time(epoch_unix, time) {
        Some(wall) => {
            let _ = write!(line, "{} ", wall.format("%Y-%m-%d %H:%M:%S%.3f"));
        }
        None => line.push_str("????-??-?? ??:??:??.??? "),
    }
    let _ = write!(line, "t:{:012.6} ", time);

    match &record.event {
        Event::Mouse(m) => {
            let _ = write!(
                line,
                "mouse x:{:+06} y:{:+06} pressure:{:.3} ev:{:03} bttn:{} click:{} sub:{} down:{} move:{}",
                m.x, m.y, m.pressure, m.sequence, m.button, m.clicks, m.subtype, m.down as u8, m.moving as u8
            );
        }
        Event::Key(k) => {
            let _ = write!(
                line,
                "key   code:{:02X} char:{} kb:{:02X} ar:{} down:{}",
                k.keycode,
                describe_character(k.character),
                k.keyboard,
                k.autorepeat as u8,
                k.down as u8
            );
        }
        Event::Wheel(w) => {
            let _ = write!(line, "wheel dx:{} dy:{}", w.dx, w.dy);
        }
    }

    if record.missing_before > 0 {
        let _ = write!(line, "  [gap: {} missing]", record.missing_before);
    }
    if record.clock_anomaly {
        line.push_str("  [clock went backwards]");
    }
    line
}

fn describe_character(unit: u16) -> String {
    match unit {
        0 => "-".to_string(),
        _ => match char::from_u32(unit as u32) {
            Some(c) if !c.is_control() => format!("{:?}", c),
            _ => format!("U+{:04X}", unit),
        },
    }
}

/// Reconstruct typed text from key-down events.
///
/// Characters are UTF-16 code units; surrogate pairs are joined and lone
/// surrogates become U+FFFD. Carriage returns become newlines.
pub fn typed_text<'a, I>(keys: I) -> String
where
    I: IntoIterator<Item = &'a KeyEvent>,
{
    let units = keys
        .into_iter()
        .filter(|k| k.down && k.character != 0)
        .map(|k| k.character);
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .map(|c| if c == '\r' { '\n' } else { c })
        .collect()
}

/// Multi-line summary of one log file
pub fn format_summary(summary: &LogSummary) -> String {
    let mut out = String::new();
    let name = summary
        .path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<memory>".to_string());
    let _ = writeln!(out, "{}", name);
    let _ = writeln!(out, "  table:        {}", summary.table);
    let _ = writeln!(out, "  format:       {}", summary.format.version);
    match wall_time(summary.epoch_unix, 0.0) {
        Some(start) => {
            let _ = writeln!(out, "  started:      {}", start.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
        }
        None => {
            let _ = writeln!(out, "  started:      invalid epoch {}", summary.epoch_unix);
        }
    }
    let _ = writeln!(out, "  records:      {}", summary.records);
    if let (Some(first), Some(last)) = (summary.first_time, summary.last_time) {
        let _ = writeln!(out, "  span:         {:.3}s .. {:.3}s", first, last);
    }
    if let (Some(gaps), Some(lost)) = (summary.sequence_gaps, summary.lost_by_sequence) {
        let _ = writeln!(out, "  gaps:         {} ({} events lost)", gaps, lost);
    }
    let _ = writeln!(out, "  clock skews:  {}", summary.clock_anomalies);
    if summary.torn_tail_bytes > 0 {
        let _ = writeln!(out, "  torn tail:    {} bytes ignored", summary.torn_tail_bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{EventKind, MouseEvent, WheelEvent};
    use crate::codec::{FormatParams, FormatVersion};

    fn key(character: u16, down: bool) -> KeyEvent {
        KeyEvent {
            time: 0.0,
            keycode: 0,
            character,
            keyboard: 0,
            autorepeat: false,
            down,
        }
    }

    #[test]
    fn test_typed_text_keeps_key_downs() {
        let keys = [
            key('h' as u16, true),
            key('h' as u16, false),
            key('i' as u16, true),
            key(0, true),
            key('\r' as u16, true),
        ];
        assert_eq!(typed_text(&keys), "hi\n");
    }

    #[test]
    fn test_typed_text_joins_surrogates() {
        let units: Vec<u16> = "a😀".encode_utf16().collect();
        let mut keys: Vec<KeyEvent> = units.iter().map(|u| key(*u, true)).collect();
        keys.push(key(0xD800, true));
        assert_eq!(typed_text(&keys), "a😀\u{FFFD}");
    }

    #[test]
    fn test_format_record_mentions_fields_and_flags() {
        let record = DecodedRecord {
            event: Event::Mouse(MouseEvent {
                time: 1.5,
                x: -5,
                y: 10,
                pressure: 0.5,
                sequence: 9,
                button: 1,
                clicks: 2,
                subtype: 0,
                down: true,
                moving: false,
            }),
            clock_anomaly: true,
            missing_before: 3,
        };
        let line = format_record(&record, 0.0);
        assert!(line.starts_with("1970-01-01 00:00:01.500"));
        assert!(line.contains("x:-00005"));
        assert!(line.contains("ev:009"));
        assert!(line.contains("[gap: 3 missing]"));
        assert!(line.contains("[clock went backwards]"));
    }

    #[test]
    fn test_format_summary() {
        let summary = LogSummary {
            path: None,
            table: EventKind::Wheel,
            format: FormatParams::from(FormatVersion::V2),
            epoch_unix: 0.0,
            records: 2,
            torn_tail_bytes: 4,
            sequence_gaps: None,
            lost_by_sequence: None,
            clock_anomalies: 0,
            first_time: Some(0.0),
            last_time: Some(1.0),
        };
        let text = format_summary(&summary);
        assert!(text.contains("table:        wheel"));
        assert!(text.contains("records:      2"));
        assert!(text.contains("torn tail:    4 bytes"));
        assert!(!text.contains("gaps:"));

        let wheel = DecodedRecord {
            event: Event::Wheel(WheelEvent { time: 0.0, dx: 1, dy: -1 }),
            clock_anomaly: false,
            missing_before: 0,
        };
        assert!(format_record(&wheel, 0.0).ends_with("wheel dx:1 dy:-1"));
    }
}
