//! Record Layouts
//!
//! Every format version is a fixed byte width shared by all event kinds.
//! Flags and small enumerations are packed with explicit mask-and-shift
//! tables, so the wire layout does not depend on compiler struct packing.
//!
//! ```text
//! V2 (16 bytes)                         V1 (12 bytes)
//! mouse: f64 time i16 x i16 y           f32 time i16 x i16 y
//!        u16 pressure u8 seq u8 bits           u16 pressure u8 seq u8 bits
//! key:   f64 time u16 code u16 char     f32 time u16 code u16 char
//!        u32 bits                              u32 bits
//! wheel: f64 time i32 dx i32 dy         f32 time i32 dx i32 dy
//! ```

use super::record::{decode, encode_as};
use super::CodecError;
use crate::capture::types::{Event, EventKind, KeyEvent, MouseEvent, WheelEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Widest record of any known version
pub const MAX_RECORD_WIDTH: usize = 16;

/// Named, fixed-width schema covering all event kinds at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum FormatVersion {
    /// 12-byte records, single-precision time
    V1 = 1,
    /// 16-byte records, double-precision time
    V2 = 2,
}

impl FormatVersion {
    /// The version every live capture encodes to
    pub const CURRENT: FormatVersion = FormatVersion::V2;

    /// Every version this build can read
    pub const ALL: [FormatVersion; 2] = [FormatVersion::V1, FormatVersion::V2];

    /// Tag stored alongside persisted records
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Look up a version by stored tag
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(FormatVersion::V1),
            2 => Some(FormatVersion::V2),
            _ => None,
        }
    }

    /// Declared byte width of every record kind in this version
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            FormatVersion::V1 => 12,
            FormatVersion::V2 => 16,
        }
    }

    #[inline]
    pub const fn time_precision(self) -> TimePrecision {
        match self {
            FormatVersion::V1 => TimePrecision::Single,
            FormatVersion::V2 => TimePrecision::Double,
        }
    }

    /// Bit tables for this version
    pub const fn layout(self) -> &'static Layout {
        match self {
            FormatVersion::V1 => &LAYOUT_V1,
            FormatVersion::V2 => &LAYOUT_V2,
        }
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({} bytes)", self.tag(), self.width())
    }
}

/// Floating point width of the `time` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePrecision {
    Single,
    Double,
}

impl TimePrecision {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            TimePrecision::Single => 4,
            TimePrecision::Double => 8,
        }
    }

    /// Largest rounding error the field introduces for `time`
    pub fn max_error(self, time: f64) -> f64 {
        match self {
            TimePrecision::Single => time.abs() * f32::EPSILON as f64,
            TimePrecision::Double => 0.0,
        }
    }
}

/// A field packed into an unsigned word at `shift`, occupying `width` bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub shift: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Largest value the field holds
    #[inline]
    pub const fn max(self) -> u32 {
        ((1u64 << self.width) - 1) as u32
    }

    #[inline]
    pub const fn mask(self) -> u32 {
        self.max() << self.shift
    }

    /// Upper bound (exclusive) of the bits this field occupies
    #[inline]
    pub const fn end(self) -> u32 {
        self.shift + self.width
    }

    /// Extract the field from `word`
    #[inline]
    pub const fn get(self, word: u32) -> u32 {
        (word >> self.shift) & self.max()
    }

    /// Store `value` (saturated to the field's max) into `word`
    #[inline]
    pub const fn put(self, word: u32, value: u32) -> u32 {
        let value = if value > self.max() { self.max() } else { value };
        (word & !self.mask()) | (value << self.shift)
    }

    #[inline]
    pub const fn put_flag(self, word: u32, flag: bool) -> u32 {
        self.put(word, flag as u32)
    }

    #[inline]
    pub const fn get_flag(self, word: u32) -> bool {
        self.get(word) != 0
    }

    const fn overlaps(self, other: BitField) -> bool {
        self.mask() & other.mask() != 0
    }
}

/// Packing of the mouse `bits` byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseBits {
    pub button: BitField,
    pub clicks: BitField,
    pub subtype: BitField,
    pub down: BitField,
    pub moving: BitField,
}

impl MouseBits {
    const fn fields(&self) -> [BitField; 5] {
        [self.button, self.clicks, self.subtype, self.down, self.moving]
    }
}

/// Packing of the key `bits` word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBits {
    pub keyboard: BitField,
    pub autorepeat: BitField,
    pub down: BitField,
}

impl KeyBits {
    const fn fields(&self) -> [BitField; 3] {
        [self.keyboard, self.autorepeat, self.down]
    }
}

/// Complete constant table for one format version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub version: FormatVersion,
    pub mouse: MouseBits,
    pub key: KeyBits,
}

/// Width in bits of the mouse flag byte
pub const MOUSE_BITS_WORD: u32 = u8::BITS;
/// Width in bits of the key flag word
pub const KEY_BITS_WORD: u32 = u32::BITS;

const MOUSE_BITS: MouseBits = MouseBits {
    button: BitField::new(0, 2),
    clicks: BitField::new(2, 2),
    subtype: BitField::new(4, 2),
    down: BitField::new(6, 1),
    moving: BitField::new(7, 1),
};

const KEY_BITS: KeyBits = KeyBits {
    keyboard: BitField::new(0, 30),
    autorepeat: BitField::new(30, 1),
    down: BitField::new(31, 1),
};

/// Bit tables for the 12-byte format
pub const LAYOUT_V1: Layout = Layout {
    version: FormatVersion::V1,
    mouse: MOUSE_BITS,
    key: KEY_BITS,
};

/// Bit tables for the 16-byte format
pub const LAYOUT_V2: Layout = Layout {
    version: FormatVersion::V2,
    mouse: MOUSE_BITS,
    key: KEY_BITS,
};

// Body bytes after the time field
const MOUSE_BODY: usize = 2 + 2 + 2 + 1 + 1;
const KEY_BODY: usize = 2 + 2 + 4;
const WHEEL_BODY: usize = 4 + 4;

/// Bytes a record of `kind` occupies under `version`, computed from its fields
pub const fn encoded_width(kind: EventKind, version: FormatVersion) -> usize {
    let body = match kind {
        EventKind::Mouse => MOUSE_BODY,
        EventKind::Key => KEY_BODY,
        EventKind::Wheel => WHEEL_BODY,
    };
    version.time_precision().bytes() + body
}

const _: () = {
    assert!(encoded_width(EventKind::Mouse, FormatVersion::V1) == FormatVersion::V1.width());
    assert!(encoded_width(EventKind::Key, FormatVersion::V1) == FormatVersion::V1.width());
    assert!(encoded_width(EventKind::Wheel, FormatVersion::V1) == FormatVersion::V1.width());
    assert!(encoded_width(EventKind::Mouse, FormatVersion::V2) == FormatVersion::V2.width());
    assert!(encoded_width(EventKind::Key, FormatVersion::V2) == FormatVersion::V2.width());
    assert!(encoded_width(EventKind::Wheel, FormatVersion::V2) == FormatVersion::V2.width());
    assert!(FormatVersion::V2.width() <= MAX_RECORD_WIDTH);
};

fn check_fields(version: FormatVersion, what: &str, fields: &[BitField], word_bits: u32) -> crate::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if field.width == 0 || field.end() > word_bits {
            return Err(crate::Error::LayoutMismatch(format!(
                "{}: {} field {} spans bits {}..{} of a {}-bit word",
                version,
                what,
                i,
                field.shift,
                field.end(),
                word_bits
            )));
        }
        if fields[i + 1..].iter().any(|other| field.overlaps(*other)) {
            return Err(crate::Error::LayoutMismatch(format!(
                "{}: {} field {} overlaps another field",
                version, what, i
            )));
        }
    }
    Ok(())
}

fn probe_events() -> [Event; 3] {
    [
        Event::Mouse(MouseEvent {
            time: 1.0,
            x: -1,
            y: 1,
            pressure: 1.0,
            sequence: u8::MAX,
            button: 3,
            clicks: 3,
            subtype: 3,
            down: true,
            moving: true,
        }),
        Event::Key(KeyEvent {
            time: 1.0,
            keycode: u16::MAX,
            character: u16::MAX,
            keyboard: crate::capture::types::KEYBOARD_ID_MAX,
            autorepeat: true,
            down: true,
        }),
        Event::Wheel(WheelEvent {
            time: 1.0,
            dx: i32::MIN,
            dy: i32::MAX,
        }),
    ]
}

/// Startup self-check of every known layout.
///
/// Encodes a probe of each kind under each version and compares the produced
/// width against the version's declared width, then decodes it back. Any
/// divergence means the build is inconsistent and capture must not start.
pub fn verify_layouts() -> crate::Result<()> {
    for version in FormatVersion::ALL {
        let layout = version.layout();
        if layout.version != version {
            return Err(crate::Error::LayoutMismatch(format!(
                "layout table for {} is registered as {}",
                version, layout.version
            )));
        }
        check_fields(version, "mouse", &layout.mouse.fields(), MOUSE_BITS_WORD)?;
        check_fields(version, "key", &layout.key.fields(), KEY_BITS_WORD)?;

        for event in probe_events() {
            let kind = event.kind();
            let bytes = encode_as(&event, version);
            if bytes.len() != version.width() || encoded_width(kind, version) != version.width() {
                return Err(crate::Error::LayoutMismatch(format!(
                    "{} record is {} bytes under {}, expected {}",
                    kind,
                    bytes.len(),
                    version,
                    version.width()
                )));
            }
            match decode(&bytes, kind, version) {
                Ok(decoded) if decoded == event => {}
                Ok(decoded) => {
                    return Err(crate::Error::LayoutMismatch(format!(
                        "{} probe did not survive {}: {:?}",
                        kind, version, decoded
                    )))
                }
                Err(CodecError::SizeMismatch { expected, actual }) => {
                    return Err(crate::Error::LayoutMismatch(format!(
                        "{} probe under {}: expected {} bytes, got {}",
                        kind, version, expected, actual
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    debug!("Record layouts verified for {} versions", FormatVersion::ALL.len());
    Ok(())
}
