//! Record Codec
//!
//! Pure conversions between [`Event`]s and fixed-width byte records. Live
//! capture always encodes to [`FormatVersion::CURRENT`]; decoding requires the
//! version the bytes were written under.

use super::layout::{FormatVersion, Layout};
use super::CodecError;
use crate::capture::types::{Event, EventKind, KeyEvent, MouseEvent, WheelEvent};

/// Width of records produced by live capture
pub const RECORD_WIDTH: usize = FormatVersion::CURRENT.width();

/// One encoded record of the current format version
pub type RecordBytes = [u8; RECORD_WIDTH];

/// Quantization ceiling for mouse pressure
pub const PRESSURE_MAX: u16 = u16::MAX;

/// Distance between adjacent representable pressure values
pub const PRESSURE_STEP: f64 = 1.0 / PRESSURE_MAX as f64;

/// Map pressure in 0..=1 onto the nearest u16 step
#[inline]
pub fn quantize_pressure(pressure: f64) -> u16 {
    if pressure.is_nan() {
        return 0;
    }
    (pressure.clamp(0.0, 1.0) * PRESSURE_MAX as f64).round() as u16
}

#[inline]
pub fn dequantize_pressure(quantized: u16) -> f64 {
    quantized as f64 / PRESSURE_MAX as f64
}

/// An encoded record travelling through the capture buffer.
///
/// Immutable once built. Carries its kind (which selects the storage table),
/// the full in-memory sequence number, and whether the producer saw its
/// timestamp go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedRecord {
    kind: EventKind,
    sequence: u32,
    clock_anomaly: bool,
    bytes: RecordBytes,
}

impl EncodedRecord {
    /// Encode `event` under the current format version
    pub fn new(event: &Event, sequence: u32, clock_anomaly: bool) -> Self {
        Self {
            kind: event.kind(),
            sequence,
            clock_anomaly,
            bytes: encode(event),
        }
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline]
    pub fn clock_anomaly(&self) -> bool {
        self.clock_anomaly
    }

    #[inline]
    pub fn bytes(&self) -> &RecordBytes {
        &self.bytes
    }

    /// Decode the payload back into an event
    pub fn decode(&self) -> Result<Event, CodecError> {
        decode(&self.bytes, self.kind, FormatVersion::CURRENT)
    }
}

/// Little-endian cursor over an output record
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes())
    }
    pub fn f64(&mut self, v: f64) {
        self.put(&v.to_le_bytes())
    }
    fn u8(&mut self, v: u8) {
        self.put(&[v])
    }
    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes())
    }
    fn i16(&mut self, v: i16) {
        self.put(&v.to_le_bytes())
    }
    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes())
    }
    fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes())
    }
}

/// Little-endian cursor over an input record. Callers check the length first.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
    pub fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }
    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }
    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }
    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }
    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }
    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }
}

/// One implementation per format version.
///
/// Versions differ only in how `time` is stored; field bodies are shared and
/// driven by the version's [`Layout`] tables.
pub trait RecordCodec {
    const VERSION: FormatVersion;

    fn write_time(out: &mut ByteWriter<'_>, time: f64);
    fn read_time(input: &mut ByteReader<'_>) -> f64;

    fn width() -> usize {
        Self::VERSION.width()
    }

    fn layout() -> &'static Layout {
        Self::VERSION.layout()
    }

    /// Encode into `out`, which must be exactly [`RecordCodec::width`] bytes
    fn encode_into(event: &Event, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() != Self::width() {
            return Err(CodecError::SizeMismatch {
                expected: Self::width(),
                actual: out.len(),
            });
        }
        let layout = Self::layout();
        let mut w = ByteWriter::new(out);
        match event {
            Event::Mouse(m) => {
                Self::write_time(&mut w, m.time);
                w.i16(m.x);
                w.i16(m.y);
                w.u16(quantize_pressure(m.pressure));
                w.u8(m.sequence);
                let bits = layout.mouse;
                let mut word = bits.button.put(0, m.button as u32);
                word = bits.clicks.put(word, m.clicks as u32);
                word = bits.subtype.put(word, m.subtype as u32);
                word = bits.down.put_flag(word, m.down);
                word = bits.moving.put_flag(word, m.moving);
                w.u8(word as u8);
            }
            Event::Key(k) => {
                Self::write_time(&mut w, k.time);
                w.u16(k.keycode);
                w.u16(k.character);
                let bits = layout.key;
                let mut word = bits.keyboard.put(0, k.keyboard);
                word = bits.autorepeat.put_flag(word, k.autorepeat);
                word = bits.down.put_flag(word, k.down);
                w.u32(word);
            }
            Event::Wheel(e) => {
                Self::write_time(&mut w, e.time);
                w.i32(e.dx);
                w.i32(e.dy);
            }
        }
        debug_assert_eq!(w.pos, Self::width());
        Ok(())
    }

    fn decode(kind: EventKind, bytes: &[u8]) -> Result<Event, CodecError> {
        if bytes.len() != Self::width() {
            return Err(CodecError::SizeMismatch {
                expected: Self::width(),
                actual: bytes.len(),
            });
        }
        let layout = Self::layout();
        let mut r = ByteReader::new(bytes);
        let time = Self::read_time(&mut r);
        let event = match kind {
            EventKind::Mouse => {
                let x = r.i16();
                let y = r.i16();
                let pressure = dequantize_pressure(r.u16());
                let sequence = r.u8();
                let word = r.u8() as u32;
                let bits = layout.mouse;
                Event::Mouse(MouseEvent {
                    time,
                    x,
                    y,
                    pressure,
                    sequence,
                    button: bits.button.get(word) as u8,
                    clicks: bits.clicks.get(word) as u8,
                    subtype: bits.subtype.get(word) as u8,
                    down: bits.down.get_flag(word),
                    moving: bits.moving.get_flag(word),
                })
            }
            EventKind::Key => {
                let keycode = r.u16();
                let character = r.u16();
                let word = r.u32();
                let bits = layout.key;
                Event::Key(KeyEvent {
                    time,
                    keycode,
                    character,
                    keyboard: bits.keyboard.get(word),
                    autorepeat: bits.autorepeat.get_flag(word),
                    down: bits.down.get_flag(word),
                })
            }
            EventKind::Wheel => Event::Wheel(WheelEvent {
                time,
                dx: r.i32(),
                dy: r.i32(),
            }),
        };
        Ok(event)
    }
}

/// Codec for the 12-byte, single-precision-time format
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCodec;

impl RecordCodec for CompactCodec {
    const VERSION: FormatVersion = FormatVersion::V1;

    fn write_time(out: &mut ByteWriter<'_>, time: f64) {
        out.f32(time as f32)
    }

    fn read_time(input: &mut ByteReader<'_>) -> f64 {
        input.f32() as f64
    }
}

/// Codec for the 16-byte, double-precision-time format
#[derive(Debug, Clone, Copy, Default)]
pub struct WideCodec;

impl RecordCodec for WideCodec {
    const VERSION: FormatVersion = FormatVersion::V2;

    fn write_time(out: &mut ByteWriter<'_>, time: f64) {
        out.f64(time)
    }

    fn read_time(input: &mut ByteReader<'_>) -> f64 {
        input.f64()
    }
}

/// Encode under the current format version
pub fn encode(event: &Event) -> RecordBytes {
    let mut out = [0u8; RECORD_WIDTH];
    // The buffer is sized from the current version, so this cannot mismatch
    let written = WideCodec::encode_into(event, &mut out);
    debug_assert!(written.is_ok(), "current-width encode failed: {:?}", written);
    out
}

/// Encode under an explicit format version
pub fn encode_as(event: &Event, version: FormatVersion) -> Vec<u8> {
    let mut out = vec![0u8; version.width()];
    let written = match version {
        FormatVersion::V1 => CompactCodec::encode_into(event, &mut out),
        FormatVersion::V2 => WideCodec::encode_into(event, &mut out),
    };
    debug_assert!(written.is_ok(), "{} encode failed: {:?}", version, written);
    out
}

/// Decode one record of `kind` written under `version`
pub fn decode(bytes: &[u8], kind: EventKind, version: FormatVersion) -> Result<Event, CodecError> {
    match version {
        FormatVersion::V1 => CompactCodec::decode(kind, bytes),
        FormatVersion::V2 => WideCodec::decode(kind, bytes),
    }
}
