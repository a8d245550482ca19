//! Capture Control Surface
//!
//! Shared, cloneable handle through which the rest of the program steers a
//! running capture session: enable/disable, flush requests, cooperative
//! shutdown and counters.

use super::ring_buffer::{BufferSnapshot, BufferStats};
use crate::writer::{WriterSnapshot, WriterStats};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Cooperative cancellation flag that sleeping threads can wait on
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.cond.notify_all();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, returning early on cancellation.
    ///
    /// Returns true if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.inner.lock.lock();
        if self.is_cancelled() {
            return true;
        }
        let _ = self.inner.cond.wait_for(&mut guard, timeout);
        self.is_cancelled()
    }
}

/// Counters maintained by the capture source
#[derive(Debug, Default)]
pub struct SourceStats {
    /// Events that passed the policy and were offered to the buffer
    pub captured: AtomicU64,
    /// Events rejected by the capture policy
    pub exempted: AtomicU64,
    /// Events delivered while capture was disabled
    pub ignored_while_disabled: AtomicU64,
    /// Events whose time went backwards relative to the previous event of the same kind
    pub clock_anomalies: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
    pub captured: u64,
    pub exempted: u64,
    pub ignored_while_disabled: u64,
    pub clock_anomalies: u64,
}

impl SourceStats {
    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            exempted: self.exempted.load(Ordering::Relaxed),
            ignored_while_disabled: self.ignored_while_disabled.load(Ordering::Relaxed),
            clock_anomalies: self.clock_anomalies.load(Ordering::Relaxed),
        }
    }
}

/// Every counter of a session, at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureCounters {
    pub source: SourceSnapshot,
    pub buffer: BufferSnapshot,
    pub writer: WriterSnapshot,
}

impl CaptureCounters {
    /// Records dropped at the buffer plus records the writer gave up on
    pub fn total_lost(&self) -> u64 {
        self.buffer.records_dropped + self.writer.records_lost
    }
}

#[derive(Debug)]
struct ControlInner {
    enabled: AtomicBool,
    flush_requested: AtomicBool,
    cancel: CancelToken,
    source: Arc<SourceStats>,
    buffer: Arc<BufferStats>,
    writer: Arc<WriterStats>,
}

/// Handle shared by the source, the writer and whoever controls the session
#[derive(Debug, Clone)]
pub struct CaptureControl {
    inner: Arc<ControlInner>,
}

impl CaptureControl {
    pub fn new(buffer: Arc<BufferStats>, writer: Arc<WriterStats>) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                enabled: AtomicBool::new(true),
                flush_requested: AtomicBool::new(false),
                cancel: CancelToken::new(),
                source: Arc::new(SourceStats::default()),
                buffer,
                writer,
            }),
        }
    }

    /// Resume recording
    pub fn enable(&self) {
        if !self.inner.enabled.swap(true, Ordering::SeqCst) {
            tracing::info!("Capture enabled");
        }
    }

    /// Pause recording. Events delivered while disabled are counted and discarded.
    pub fn disable(&self) {
        if self.inner.enabled.swap(false, Ordering::SeqCst) {
            tracing::info!("Capture disabled");
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Ask the writer to flush the sink at its next opportunity
    pub fn request_flush(&self) {
        self.inner.flush_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending flush request
    pub fn take_flush_request(&self) -> bool {
        self.inner.flush_requested.swap(false, Ordering::SeqCst)
    }

    /// Begin cooperative shutdown
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::info!("Capture shutdown requested");
        }
        self.inner.cancel.cancel();
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub fn source_stats(&self) -> &Arc<SourceStats> {
        &self.inner.source
    }

    pub fn writer_stats(&self) -> &Arc<WriterStats> {
        &self.inner.writer
    }

    pub fn counters(&self) -> CaptureCounters {
        CaptureCounters {
            source: self.inner.source.snapshot(),
            buffer: self.inner.buffer.snapshot(),
            writer: self.inner.writer.snapshot(),
        }
    }
}
