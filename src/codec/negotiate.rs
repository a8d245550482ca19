//! Format Negotiator
//!
//! Maps a stored version tag to the codec parameters needed to read it. Only
//! used on the read path; live capture always writes the current version.
//! Unknown tags are refused outright, since misreading bit-packed fields is
//! worse than not reading them.

use super::layout::{FormatVersion, TimePrecision};
use super::CodecError;
use serde::Serialize;

/// Everything a reader needs to interpret records of one stored version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatParams {
    pub version: FormatVersion,
    pub width: usize,
    pub time_precision: TimePrecision,
}

impl From<FormatVersion> for FormatParams {
    fn from(version: FormatVersion) -> Self {
        Self {
            version,
            width: version.width(),
            time_precision: version.time_precision(),
        }
    }
}

/// Resolve a stored tag
pub fn resolve(tag: u8) -> Result<FormatParams, CodecError> {
    FormatVersion::from_tag(tag)
        .map(FormatParams::from)
        .ok_or(CodecError::UnsupportedFormat { tag })
}

/// Resolve a stored tag against the version a caller expects.
///
/// With `declared = None` the stored tag wins. A declared version that
/// differs from the stored one is an error rather than a reinterpretation.
pub fn negotiate(stored_tag: u8, declared: Option<FormatVersion>) -> Result<FormatParams, CodecError> {
    let params = resolve(stored_tag)?;
    match declared {
        Some(declared) if declared != params.version => Err(CodecError::VersionMismatch {
            stored: params.version,
            declared,
        }),
        _ => Ok(params),
    }
}
