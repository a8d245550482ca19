//! Lock-Free Ring Buffer for Encoded Records
//!
//! This module implements the bounded SPSC (Single Producer, Single Consumer)
//! capture buffer between the event-delivery callback and the persistence
//! writer.
//!
//! Architecture:
//! - Producer (event source callback): never blocks unboundedly; on overflow
//!   the newest record is dropped and counted
//! - Consumer (persistence writer): may wait briefly for new data, with a
//!   timeout, so the writer idles without busy polling. Before its final
//!   drain it closes the buffer; pushes after that are dropped and counted
//!
//! The design uses the `rtrb` crate for the ring buffer itself and a
//! `parking_lot` condvar for consumer wakeups.

use super::types::EventKind;
use crate::codec::EncodedRecord;
use parking_lot::{Condvar, Mutex};
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default ring buffer capacity (must be power of 2)
pub const DEFAULT_CAPACITY: usize = 8192;

/// What the producer does when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the incoming record immediately
    #[default]
    DropNewest,
    /// Retry for up to `max_wait`, then reject the incoming record
    WaitThenDrop { max_wait: Duration },
}

/// Buffer statistics for monitoring
#[derive(Debug, Default)]
pub struct BufferStats {
    /// Records accepted into the buffer
    pub records_pushed: AtomicU64,
    /// Records rejected because the buffer was full
    pub records_dropped: AtomicU64,
    /// Drops broken down by kind
    pub dropped_by_kind: [AtomicU64; 3],
    /// Records handed to the consumer
    pub records_consumed: AtomicU64,
    /// Peak buffer occupancy
    pub peak_occupancy: AtomicU64,
}

/// Point-in-time copy of [`BufferStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferSnapshot {
    pub records_pushed: u64,
    pub records_dropped: u64,
    pub dropped_mouse: u64,
    pub dropped_key: u64,
    pub dropped_wheel: u64,
    pub records_consumed: u64,
    pub peak_occupancy: u64,
}

impl BufferStats {
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            records_pushed: self.records_pushed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            dropped_mouse: self.dropped(EventKind::Mouse),
            dropped_key: self.dropped(EventKind::Key),
            dropped_wheel: self.dropped(EventKind::Wheel),
            records_consumed: self.records_consumed.load(Ordering::Relaxed),
            peak_occupancy: self.peak_occupancy.load(Ordering::Relaxed),
        }
    }

    /// Drops recorded for one kind
    pub fn dropped(&self, kind: EventKind) -> u64 {
        self.dropped_by_kind[kind.index()].load(Ordering::Relaxed)
    }

    fn record_drop(&self, kind: EventKind) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
        self.dropped_by_kind[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn record_occupancy(&self, occupied: u64) {
        let mut peak = self.peak_occupancy.load(Ordering::Relaxed);
        while occupied > peak {
            match self.peak_occupancy.compare_exchange_weak(
                peak,
                occupied,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}

/// State shared by both halves under the drain signal's mutex
#[derive(Debug, Default)]
struct SignalState {
    /// Set by the consumer before its final drain; later pushes are dropped
    closed: bool,
    /// Set when the producer half is dropped
    producer_gone: bool,
}

/// Consumer wakeup. Pushes happen under the mutex, so a push either lands
/// before the consumer closes the buffer or sees it closed.
#[derive(Debug, Default)]
struct DrainSignal {
    state: Mutex<SignalState>,
    ready: Condvar,
}

/// Bounded capture buffer.
///
/// Created once, then [`split`](CaptureBuffer::split) into a producer half
/// for the event-delivery context and a consumer half for the writer.
pub struct CaptureBuffer {
    producer: Producer<EncodedRecord>,
    consumer: Consumer<EncodedRecord>,
    signal: Arc<DrainSignal>,
    stats: Arc<BufferStats>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl CaptureBuffer {
    /// Create a new buffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new buffer with specified capacity
    ///
    /// # Panics
    /// Panics if capacity is not a power of 2
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "Ring buffer capacity must be a power of 2"
        );

        let (producer, consumer) = RingBuffer::new(capacity);

        Self {
            producer,
            consumer,
            signal: Arc::new(DrainSignal::default()),
            stats: Arc::new(BufferStats::default()),
            capacity,
            policy: OverflowPolicy::default(),
        }
    }

    /// Set the overflow policy (before splitting)
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Split the buffer into producer and consumer halves
    pub fn split(self) -> (RecordProducer, RecordConsumer) {
        (
            RecordProducer {
                inner: self.producer,
                signal: Arc::clone(&self.signal),
                stats: Arc::clone(&self.stats),
                capacity: self.capacity,
                policy: self.policy,
            },
            RecordConsumer {
                inner: self.consumer,
                signal: self.signal,
                stats: Arc::clone(&self.stats),
                capacity: self.capacity,
            },
        )
    }

    /// Get statistics
    pub fn stats(&self) -> Arc<BufferStats> {
        Arc::clone(&self.stats)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of the buffer (event-delivery context)
pub struct RecordProducer {
    inner: Producer<EncodedRecord>,
    signal: Arc<DrainSignal>,
    stats: Arc<BufferStats>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl RecordProducer {
    /// Push a record into the buffer.
    ///
    /// Never blocks beyond the overflow policy's bound. If the buffer stays
    /// full, or the consumer has closed it, the record is dropped and the
    /// drop counters are incremented.
    ///
    /// Returns true if the record was accepted, false if dropped.
    #[inline]
    pub fn push(&mut self, record: EncodedRecord) -> bool {
        let deadline = match self.policy {
            OverflowPolicy::DropNewest => None,
            OverflowPolicy::WaitThenDrop { max_wait } => Some(Instant::now() + max_wait),
        };
        let mut pending = record;

        loop {
            let state = self.signal.state.lock();
            if state.closed {
                drop(state);
                self.stats.record_drop(pending.kind());
                return false;
            }
            let pushed = self.inner.push(pending);
            drop(state);
            // Wake a sleeping consumer either way; when full it has work
            self.signal.ready.notify_one();

            match pushed {
                Ok(()) => {
                    self.accepted();
                    return true;
                }
                Err(PushError::Full(r)) => pending = r,
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => std::thread::yield_now(),
                _ => break,
            }
        }

        self.stats.record_drop(pending.kind());
        false
    }

    #[inline]
    fn accepted(&self) {
        self.stats.records_pushed.fetch_add(1, Ordering::Relaxed);
        let occupied = self.capacity - self.inner.slots();
        self.stats.record_occupancy(occupied as u64);
    }

    /// True once the consumer has stopped taking records
    pub fn is_closed(&self) -> bool {
        self.signal.state.lock().closed
    }

    /// Check available slots without pushing
    #[inline]
    pub fn available_slots(&self) -> usize {
        self.inner.slots()
    }

    /// Check if buffer is full
    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn stats(&self) -> Arc<BufferStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for RecordProducer {
    fn drop(&mut self) {
        self.signal.state.lock().producer_gone = true;
        self.signal.ready.notify_all();
    }
}

/// Consumer half of the buffer (persistence writer)
pub struct RecordConsumer {
    inner: Consumer<EncodedRecord>,
    signal: Arc<DrainSignal>,
    stats: Arc<BufferStats>,
    capacity: usize,
}

impl RecordConsumer {
    /// Remove up to `max_n` of the oldest records, in FIFO order.
    ///
    /// If the buffer is empty, waits up to `timeout` for the producer to
    /// push something. This is the only buffer operation that blocks.
    pub fn drain(&mut self, max_n: usize, timeout: Duration) -> Vec<EncodedRecord> {
        if self.inner.is_empty() && !timeout.is_zero() {
            let mut state = self.signal.state.lock();
            if self.inner.is_empty() && !state.producer_gone && !state.closed {
                let _ = self.signal.ready.wait_for(&mut state, timeout);
            }
        }
        self.try_drain(max_n)
    }

    /// Remove up to `max_n` of the oldest records without waiting
    pub fn try_drain(&mut self, max_n: usize) -> Vec<EncodedRecord> {
        let count = self.inner.slots().min(max_n);
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            match self.inner.pop() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }
        self.stats
            .records_consumed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    /// Try to peek at the next record without removing it
    #[inline]
    pub fn peek(&self) -> Option<&EncodedRecord> {
        self.inner.peek().ok()
    }

    /// Check if there are records available
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get number of available records
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.slots()
    }

    /// True once the producer half has been dropped
    #[inline]
    pub fn is_abandoned(&self) -> bool {
        self.inner.is_abandoned() || self.signal.state.lock().producer_gone
    }

    /// Refuse every later push. Records already buffered stay drainable,
    /// and refused pushes are counted as drops.
    pub fn close(&self) {
        self.signal.state.lock().closed = true;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> Arc<BufferStats> {
        Arc::clone(&self.stats)
    }
}
