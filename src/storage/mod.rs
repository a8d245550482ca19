//! Storage sinks
//!
//! The persistence writer appends encoded records through [`StorageSink`],
//! one table per event kind. Two backends ship with the crate: an
//! append-only file log and an in-memory sink used by tests and demos.

pub mod file_log;
pub mod memory;
pub mod reader;

pub use file_log::{FileSink, LogHeader, HEADER_LEN, LOG_EXTENSION, MAGIC};
pub use memory::MemorySink;
pub use reader::{list_logs, DecodedRecord, LogReader, LogSummary};

use crate::capture::types::EventKind;
use crate::codec::{CodecError, RecordBytes};
use thiserror::Error;

/// Errors reported by storage backends
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid log header: {0}")]
    Header(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Append-only, table-per-kind record storage.
///
/// Owned by exactly one writer thread.
pub trait StorageSink: Send {
    /// Append `records` to `table`, in order.
    ///
    /// Returns how many leading records were accepted; the caller retries
    /// the rest. An error means none were. Accepted records must already be
    /// in the backing store, not held in a buffer a later flush can lose.
    fn append_batch(&mut self, table: EventKind, records: &[RecordBytes]) -> Result<usize, SinkError>;

    /// Sync everything appended so far. A failure here loses no accepted
    /// records.
    fn flush(&mut self) -> Result<(), SinkError>;
}

impl<S: StorageSink + ?Sized> StorageSink for Box<S> {
    fn append_batch(&mut self, table: EventKind, records: &[RecordBytes]) -> Result<usize, SinkError> {
        (**self).append_batch(table, records)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}
