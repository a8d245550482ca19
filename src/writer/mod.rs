//! Persistence writer
//!
//! Consumer side of the pipeline. A dedicated thread drains the capture
//! buffer, groups consecutive same-kind records and appends them to the
//! storage sink, retrying transient failures.

pub mod persistence;
pub mod retry;

pub use persistence::{PersistenceWriter, WriterConfig, WriterSnapshot, WriterStats};
pub use retry::RetryPolicy;
