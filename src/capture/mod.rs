//! Event capture module
//!
//! Producer side of the pipeline: normalized event types, the sequence
//! tagger, the bounded capture buffer and the source that ties them
//! together. On macOS the Quartz event tap feeds the source; elsewhere a
//! synthetic generator does.

pub mod control;
pub mod ring_buffer;
pub mod sequence;
pub mod source;
pub mod types;

#[cfg(target_os = "macos")]
pub mod event_tap;

pub use control::{CancelToken, CaptureControl, CaptureCounters, SourceStats};
pub use ring_buffer::{BufferStats, CaptureBuffer, OverflowPolicy, RecordConsumer, RecordProducer};
pub use sequence::{GapTracker, SequenceTagger};
pub use source::{CaptureAll, CaptureOutcome, CapturePolicy, CaptureSource, ExemptProcesses};
pub use types::*;

#[cfg(target_os = "macos")]
pub use event_tap::{check_accessibility_permissions, request_accessibility_permissions, EventTap};
