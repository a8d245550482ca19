//! Persistence Writer
//!
//! Sole owner of the storage sink. Loop:
//! 1. drain up to `batch_size` records, waiting at most `drain_timeout`
//! 2. split the batch into runs of consecutive same-kind records
//! 3. append each run to its table, retrying with backoff
//!
//! On cancellation the buffer is closed, so a producer still running can
//! no longer slip records in behind the writer, and everything buffered is
//! drained and written before the thread exits.

use super::retry::RetryPolicy;
use crate::capture::control::{CancelToken, CaptureControl};
use crate::capture::ring_buffer::RecordConsumer;
use crate::capture::types::EventKind;
use crate::codec::{EncodedRecord, RecordBytes};
use crate::storage::StorageSink;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Maximum records taken from the buffer per drain
    pub batch_size: usize,
    /// How long a drain waits on an empty buffer
    pub drain_timeout: Duration,
    pub retry: RetryPolicy,
    /// Flush the sink once the final drain is written
    pub shutdown_flush: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            drain_timeout: Duration::from_millis(50),
            retry: RetryPolicy::default(),
            shutdown_flush: true,
        }
    }
}

/// Writer counters
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Runs appended (fully or partly)
    pub batches_written: AtomicU64,
    pub records_written: AtomicU64,
    /// Records discarded after retries were exhausted
    pub records_lost: AtomicU64,
    /// Runs that exhausted their retries
    pub batches_failed: AtomicU64,
    pub retries: AtomicU64,
    pub flushes: AtomicU64,
    pub flush_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterSnapshot {
    pub batches_written: u64,
    pub records_written: u64,
    pub records_lost: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub flushes: u64,
    pub flush_failures: u64,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct PersistenceWriter<S: StorageSink> {
    consumer: RecordConsumer,
    sink: S,
    control: CaptureControl,
    config: WriterConfig,
    stats: Arc<WriterStats>,
    scratch: Vec<RecordBytes>,
}

impl<S: StorageSink> PersistenceWriter<S> {
    pub fn new(consumer: RecordConsumer, sink: S, control: CaptureControl, config: WriterConfig) -> Self {
        let stats = Arc::clone(control.writer_stats());
        let batch_size = config.batch_size.max(1);
        Self {
            consumer,
            sink,
            control,
            config: WriterConfig { batch_size, ..config },
            stats,
            scratch: Vec::with_capacity(batch_size),
        }
    }

    /// Run the writer loop on the current thread until cancelled (or until
    /// the producer is gone and the buffer is empty). Returns the sink.
    pub fn run(mut self) -> S {
        info!(
            "Persistence writer started (batch {}, drain timeout {:?})",
            self.config.batch_size, self.config.drain_timeout
        );
        let cancel = self.control.cancel_token();

        while !cancel.is_cancelled() {
            let batch = self.consumer.drain(self.config.batch_size, self.config.drain_timeout);
            if !batch.is_empty() {
                self.write_records(&batch, &cancel);
            }
            if self.control.take_flush_request() {
                self.flush();
            }
            if self.consumer.is_abandoned() && self.consumer.is_empty() {
                debug!("Producer gone and buffer empty, stopping writer");
                break;
            }
        }

        self.consumer.close();
        self.final_drain(&cancel);
        if self.config.shutdown_flush || self.control.take_flush_request() {
            self.flush();
        }

        let stats = self.stats.snapshot();
        info!(
            "Persistence writer stopped: {} records written, {} lost, {} retries",
            stats.records_written, stats.records_lost, stats.retries
        );
        self.sink
    }

    /// Run the writer on a dedicated `persistence-writer` thread
    pub fn spawn(self) -> crate::Result<JoinHandle<S>>
    where
        S: 'static,
    {
        let handle = thread::Builder::new()
            .name("persistence-writer".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Everything left in a closed buffer, at most its capacity
    fn final_drain(&mut self, cancel: &CancelToken) {
        let bound = self.consumer.capacity();
        let mut drained = 0;
        while drained < bound {
            let batch = self.consumer.try_drain(self.config.batch_size.min(bound - drained));
            if batch.is_empty() {
                break;
            }
            drained += batch.len();
            self.write_records(&batch, cancel);
        }
        if drained > 0 {
            debug!("Final drain wrote {} records", drained);
        }
    }

    /// Split into runs of one kind, preserving order
    fn write_records(&mut self, records: &[EncodedRecord], cancel: &CancelToken) {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut start = 0;
        while start < records.len() {
            let kind = records[start].kind();
            let end = records[start..]
                .iter()
                .position(|r| r.kind() != kind)
                .map_or(records.len(), |p| start + p);

            scratch.clear();
            scratch.extend(records[start..end].iter().map(|r| *r.bytes()));
            self.write_run(kind, &scratch, cancel);
            start = end;
        }
        self.scratch = scratch;
    }

    fn write_run(&mut self, kind: EventKind, run: &[RecordBytes], cancel: &CancelToken) {
        let retry = self.config.retry;
        let mut offset = 0;
        let mut failures = 0u32;

        while offset < run.len() {
            let remaining = &run[offset..];
            let reason = match self.sink.append_batch(kind, remaining) {
                Ok(n) if n >= remaining.len() => {
                    offset = run.len();
                    break;
                }
                Ok(0) => "sink accepted no records".to_string(),
                Ok(n) => {
                    debug!("Partial append to {}: {} of {}", kind, n, remaining.len());
                    offset += n;
                    continue;
                }
                Err(e) => e.to_string(),
            };

            failures += 1;
            if failures >= retry.attempts() {
                let lost = (run.len() - offset) as u64;
                self.stats.records_lost.fetch_add(lost, Ordering::Relaxed);
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "Giving up on {} {} records after {} attempts: {}",
                    lost, kind, failures, reason
                );
                break;
            }

            let delay = retry.delay_for(failures - 1);
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Append to {} failed (attempt {}/{}): {}; retrying in {:?}",
                kind,
                failures,
                retry.attempts(),
                reason,
                delay
            );
            // Returns early on shutdown; the retry then happens immediately
            cancel.wait_timeout(delay);
        }

        if offset > 0 {
            self.stats.batches_written.fetch_add(1, Ordering::Relaxed);
            self.stats.records_written.fetch_add(offset as u64, Ordering::Relaxed);
        }
    }

    fn flush(&mut self) {
        match self.sink.flush() {
            Ok(()) => {
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                debug!("Sink flushed");
            }
            Err(e) => {
                self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Sink flush failed: {}", e);
            }
        }
    }
}
