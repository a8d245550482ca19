//! Record codec module
//!
//! Fixed-width binary encoding of every event kind, versioned layouts, and
//! the negotiator used to read logs written by other builds.

pub mod layout;
pub mod negotiate;
pub mod record;

pub use layout::{verify_layouts, FormatVersion, TimePrecision};
pub use negotiate::{negotiate, resolve, FormatParams};
pub use record::{decode, encode, encode_as, EncodedRecord, RecordBytes, RECORD_WIDTH};

use crate::capture::types::EventKind;

/// Errors raised while encoding, decoding or negotiating record formats
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("record size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("unsupported format version tag {tag}")]
    UnsupportedFormat { tag: u8 },

    #[error("format version mismatch: stored {stored}, declared {declared}")]
    VersionMismatch {
        stored: FormatVersion,
        declared: FormatVersion,
    },

    #[error("unknown event kind {0}")]
    UnknownKind(u8),

    #[error("table holds {stored} records, not {requested}")]
    KindMismatch { stored: EventKind, requested: EventKind },
}
