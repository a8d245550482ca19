//! # Input Audit
//!
//! Append-only logging of global input events (pointer, keyboard, scroll)
//! into fixed-width binary records, for security auditing.
//!
//! ## Overview
//!
//! Events arrive on a latency-sensitive delivery context (the macOS Quartz
//! Event Tap, or the synthetic source on other hosts). There they are
//! normalized, tagged with a per-kind sequence number, encoded into a
//! fixed-width record and pushed into a lock-free buffer. A persistence
//! writer thread drains the buffer in batches and appends records to one
//! table per event kind, retrying transient sink failures.
//!
//! ## Quick Start
//!
//! ```no_run
//! use input_audit::capture::{CaptureAll, CaptureContext, RawEvent};
//! use input_audit::storage::FileSink;
//! use input_audit::time::SessionClock;
//! use input_audit::workflow::{CaptureSession, SessionConfig};
//!
//! let clock = SessionClock::start();
//! let sink = FileSink::create("/tmp/audit", &clock)?;
//! let (session, mut source) =
//!     CaptureSession::start(&SessionConfig::default(), sink, CaptureAll, clock)?;
//!
//! source.on_raw_event(
//!     &RawEvent::Wheel { time: clock.now_secs(), dx: 0, dy: -3 },
//!     &CaptureContext::default(),
//! );
//!
//! let outcome = session.shutdown()?;
//! println!("{} records written", outcome.counters.writer.records_written);
//! # Ok::<(), input_audit::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`codec`]: record layouts, encode/decode and format negotiation
//! - [`capture`]: event types, sequence tagging, capture buffer, event source
//! - [`writer`]: persistence writer thread and retry policy
//! - [`storage`]: storage sink trait with file and memory backends, log reader
//! - [`time`]: session clock and reference epoch
//! - [`workflow`]: capture sessions, synthetic source, report rendering
//! - [`app`]: CLI and configuration management
//!
//! ## Event Pipeline
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │  Event tap  │───▶│   Capture   │───▶│   Capture   │───▶│ Persistence │
//! │ / synthetic │    │   source    │    │   buffer    │    │   writer    │
//! └─────────────┘    └─────────────┘    └─────────────┘    └──────┬──────┘
//!                                                                 ▼
//!                                                          ┌─────────────┐
//!                                                          │ Storage sink│
//!                                                          └─────────────┘
//! ```
//!
//! ## Permissions
//!
//! Capturing on macOS requires Accessibility permissions:
//! System Settings → Privacy & Security → Accessibility

pub mod time;
pub mod codec;
pub mod capture;
pub mod storage;
pub mod writer;
pub mod workflow;
pub mod app;

// Re-export commonly used types
pub use capture::types::{Event, EventKind, KeyEvent, MouseEvent, RawEvent, WheelEvent};
pub use codec::{CodecError, FormatVersion};
pub use storage::{SinkError, StorageSink};
pub use time::SessionClock;
pub use workflow::{CaptureSession, SessionConfig};

/// Result type alias for input audit
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for input audit
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Event capture error: {0}")]
    Capture(String),

    #[error("Record layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
