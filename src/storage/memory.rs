//! In-memory storage sink
//!
//! Cloneable handle over shared tables. The writer owns one clone; tests
//! keep another to inspect what arrived and to inject faults.

use super::{SinkError, StorageSink};
use crate::capture::types::{Event, EventKind};
use crate::codec::{decode, CodecError, FormatVersion, RecordBytes};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    tables: [Vec<RecordBytes>; 3],
    fail_next: u32,
    fail_next_flush: u32,
    accept_at_most: Option<usize>,
    unavailable: bool,
    append_calls: u64,
    flush_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` appends outright
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Fail the next `n` flushes
    pub fn fail_next_flush(&self, n: u32) {
        self.state.lock().fail_next_flush = n;
    }

    /// Let the next append accept at most `n` records
    pub fn accept_at_most(&self, n: usize) {
        self.state.lock().accept_at_most = Some(n);
    }

    /// Fail every append and flush until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Records stored in `table`
    pub fn records(&self, table: EventKind) -> Vec<RecordBytes> {
        self.state.lock().tables[table.index()].clone()
    }

    pub fn len(&self, table: EventKind) -> usize {
        self.state.lock().tables[table.index()].len()
    }

    pub fn total_len(&self) -> usize {
        self.state.lock().tables.iter().map(Vec::len).sum()
    }

    /// Decoded contents of `table`
    pub fn events(&self, table: EventKind) -> Result<Vec<Event>, CodecError> {
        self.records(table)
            .iter()
            .map(|bytes| decode(bytes, table, FormatVersion::CURRENT))
            .collect()
    }

    pub fn append_calls(&self) -> u64 {
        self.state.lock().append_calls
    }

    pub fn flush_count(&self) -> u64 {
        self.state.lock().flush_count
    }
}

impl StorageSink for MemorySink {
    fn append_batch(&mut self, table: EventKind, records: &[RecordBytes]) -> Result<usize, SinkError> {
        let mut state = self.state.lock();
        state.append_calls += 1;
        if state.unavailable {
            return Err(SinkError::Unavailable("memory sink marked unavailable".into()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Unavailable("injected append failure".into()));
        }
        let accepted = state
            .accept_at_most
            .take()
            .map_or(records.len(), |n| n.min(records.len()));
        state.tables[table.index()].extend_from_slice(&records[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(SinkError::Unavailable("memory sink marked unavailable".into()));
        }
        if state.fail_next_flush > 0 {
            state.fail_next_flush -= 1;
            return Err(SinkError::Unavailable("injected flush failure".into()));
        }
        state.flush_count += 1;
        Ok(())
    }
}
