//! Core types for event capture
//!
//! Defines the normalized in-memory events that flow through the capture
//! pipeline, the raw host-side fields they are built from, and the context
//! handed to capture policies.

use serde::{Deserialize, Serialize};

/// Largest value representable by the 2-bit mouse fields (button, clicks, subtype).
pub const MOUSE_SMALL_FIELD_MAX: u8 = 3;

/// Largest keyboard identifier representable in a key record (30 bits).
pub const KEYBOARD_ID_MAX: u32 = (1 << 30) - 1;

/// Event kinds captured by the system. Each kind is persisted to its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKind {
    /// Mouse motion, clicks and drags
    Mouse = 0,
    /// Key presses and releases
    Key = 1,
    /// Scroll wheel / trackpad scrolling
    Wheel = 2,
}

impl EventKind {
    /// All kinds, in table order
    pub const ALL: [EventKind; 3] = [EventKind::Mouse, EventKind::Key, EventKind::Wheel];

    /// Storage table name for this kind
    pub const fn table_name(&self) -> &'static str {
        match self {
            EventKind::Mouse => "mouse",
            EventKind::Key => "key",
            EventKind::Wheel => "wheel",
        }
    }

    /// Dense index, usable for per-kind arrays
    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }

    /// Parse the on-disk kind byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EventKind::Mouse),
            1 => Some(EventKind::Key),
            2 => Some(EventKind::Wheel),
            _ => None,
        }
    }

    /// Parse a table name
    pub fn from_table_name(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|k| k.table_name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A normalized mouse event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouseEvent {
    /// Seconds since the log's reference epoch
    pub time: f64,
    /// Screen x coordinate
    pub x: i16,
    /// Screen y coordinate
    pub y: i16,
    /// Normalized pressure in 0..=1 (stored quantized)
    pub pressure: f64,
    /// Wrapping per-kind sequence number as stored on the wire
    pub sequence: u8,
    /// Button index (0..=3)
    pub button: u8,
    /// Click multiplicity (0..=3)
    pub clicks: u8,
    /// Device subtype (0..=3)
    pub subtype: u8,
    /// Button held (click-down or drag)
    pub down: bool,
    /// Pointer moving (move or drag)
    pub moving: bool,
}

/// A normalized keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Seconds since the log's reference epoch
    pub time: f64,
    /// Virtual key code
    pub keycode: u16,
    /// UTF-16 code unit produced by the key, 0 if none
    pub character: u16,
    /// Keyboard/device identifier (30 bits)
    pub keyboard: u32,
    /// Key repeat generated by holding the key
    pub autorepeat: bool,
    /// Key pressed (false = released)
    pub down: bool,
}

/// A normalized scroll event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelEvent {
    /// Seconds since the log's reference epoch
    pub time: f64,
    /// Horizontal delta in raw hardware units
    pub dx: i32,
    /// Vertical delta in raw hardware units
    pub dy: i32,
}

/// Any captured event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Mouse(MouseEvent),
    Key(KeyEvent),
    Wheel(WheelEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Mouse(_) => EventKind::Mouse,
            Event::Key(_) => EventKind::Key,
            Event::Wheel(_) => EventKind::Wheel,
        }
    }

    pub fn time(&self) -> f64 {
        match self {
            Event::Mouse(e) => e.time,
            Event::Key(e) => e.time,
            Event::Wheel(e) => e.time,
        }
    }
}

impl From<MouseEvent> for Event {
    fn from(event: MouseEvent) -> Self {
        Event::Mouse(event)
    }
}

impl From<KeyEvent> for Event {
    fn from(event: KeyEvent) -> Self {
        Event::Key(event)
    }
}

impl From<WheelEvent> for Event {
    fn from(event: WheelEvent) -> Self {
        Event::Wheel(event)
    }
}

/// Raw event fields as delivered by the host's event-monitoring facility.
///
/// Values are taken as wide as the host reports them; [`RawEvent::normalize`]
/// saturates them into the ranges the record layouts can hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawEvent {
    Mouse {
        time: f64,
        x: f64,
        y: f64,
        pressure: f64,
        button: i64,
        clicks: i64,
        subtype: i64,
        down: bool,
        moving: bool,
    },
    Key {
        time: f64,
        keycode: i64,
        character: u16,
        keyboard: i64,
        autorepeat: bool,
        down: bool,
    },
    Wheel {
        time: f64,
        dx: i64,
        dy: i64,
    },
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RawEvent::Mouse { .. } => EventKind::Mouse,
            RawEvent::Key { .. } => EventKind::Key,
            RawEvent::Wheel { .. } => EventKind::Wheel,
        }
    }

    /// Normalize host values into an [`Event`].
    ///
    /// The mouse sequence field is left at 0; the sequence tagger stamps it.
    pub fn normalize(&self) -> Event {
        match *self {
            RawEvent::Mouse {
                time,
                x,
                y,
                pressure,
                button,
                clicks,
                subtype,
                down,
                moving,
            } => Event::Mouse(MouseEvent {
                time,
                x: saturate_coordinate(x),
                y: saturate_coordinate(y),
                pressure: if pressure.is_nan() { 0.0 } else { pressure.clamp(0.0, 1.0) },
                sequence: 0,
                button: saturate_small(button),
                clicks: saturate_small(clicks),
                subtype: saturate_small(subtype),
                down,
                moving,
            }),
            RawEvent::Key {
                time,
                keycode,
                character,
                keyboard,
                autorepeat,
                down,
            } => Event::Key(KeyEvent {
                time,
                keycode: keycode.clamp(0, u16::MAX as i64) as u16,
                character,
                keyboard: keyboard.clamp(0, KEYBOARD_ID_MAX as i64) as u32,
                autorepeat,
                down,
            }),
            RawEvent::Wheel { time, dx, dy } => Event::Wheel(WheelEvent {
                time,
                dx: dx.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                dy: dy.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            }),
        }
    }
}

fn saturate_coordinate(value: f64) -> i16 {
    if value.is_nan() {
        return 0;
    }
    // `as` saturates float-to-int conversions
    value.round() as i16
}

fn saturate_small(value: i64) -> u8 {
    value.clamp(0, MOUSE_SMALL_FIELD_MAX as i64) as u8
}

/// Context describing where an event is headed, handed to capture policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureContext<'a> {
    /// Target process id, if the host reports one
    pub pid: Option<i32>,
    /// Target process name, if known
    pub process_name: Option<&'a str>,
}

impl<'a> CaptureContext<'a> {
    pub fn for_pid(pid: i32) -> Self {
        Self {
            pid: Some(pid),
            process_name: None,
        }
    }

    pub fn for_process(pid: Option<i32>, process_name: &'a str) -> Self {
        Self {
            pid,
            process_name: Some(process_name),
        }
    }
}
