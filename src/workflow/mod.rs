//! Workflow Module
//!
//! Session orchestration: wiring the pipeline, the synthetic source used
//! where no host event tap exists, and report rendering for the CLI.

pub mod report;
pub mod session;
pub mod synthetic;

pub use report::{format_record, format_summary, typed_text};
pub use session::{CaptureSession, SessionConfig, SessionOutcome};
pub use synthetic::{run_synthetic, spawn_synthetic, SyntheticPattern};
