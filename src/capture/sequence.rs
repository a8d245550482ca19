//! Sequence Tagger
//!
//! Per-kind wrapping counters. Every event offered to the capture buffer
//! consumes a number, including events the buffer then drops, so a reader
//! that sees a jump of `k` knows exactly `k - 1` events were lost.

use super::types::EventKind;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bits of the sequence number that survive into each kind's on-disk record.
///
/// Only mouse records carry a sequence field (8 bits). Key and wheel
/// sequences live in memory, where they drive per-kind drop accounting.
pub const fn wire_bits(kind: EventKind) -> u32 {
    match kind {
        EventKind::Mouse => 8,
        EventKind::Key | EventKind::Wheel => 32,
    }
}

#[inline]
const fn wire_mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

/// Truncate a sequence number to the kind's wire width
#[inline]
pub const fn wire(kind: EventKind, sequence: u32) -> u32 {
    sequence & wire_mask(wire_bits(kind))
}

/// Events lost between two consecutive observed sequence numbers,
/// modulo `bits`. A decrease is a wrap, not an error.
#[inline]
pub const fn gap(previous: u32, next: u32, bits: u32) -> u32 {
    next.wrapping_sub(previous).wrapping_sub(1) & wire_mask(bits)
}

/// Monotonic, wrapping, per-kind sequence numbers
#[derive(Debug, Default)]
pub struct SequenceTagger {
    counters: [AtomicU32; 3],
}

impl SequenceTagger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next sequence number for `kind`
    #[inline]
    pub fn next(&self, kind: EventKind) -> u32 {
        // fetch_add wraps on overflow
        self.counters[kind.index()].fetch_add(1, Ordering::Relaxed)
    }

    /// Number the next event of `kind` will receive
    #[inline]
    pub fn peek(&self, kind: EventKind) -> u32 {
        self.counters[kind.index()].load(Ordering::Relaxed)
    }
}

/// Tracks gaps in one kind's observed sequence stream on the read side
#[derive(Debug, Clone)]
pub struct GapTracker {
    bits: u32,
    last: Option<u32>,
    lost: u64,
    gaps: u64,
}

impl GapTracker {
    pub fn new(kind: EventKind) -> Self {
        Self::with_bits(wire_bits(kind))
    }

    pub fn with_bits(bits: u32) -> Self {
        Self {
            bits,
            last: None,
            lost: 0,
            gaps: 0,
        }
    }

    /// Feed the next observed (wire) sequence number. Returns the events
    /// missing before it.
    pub fn observe(&mut self, sequence: u32) -> u32 {
        let sequence = sequence & wire_mask(self.bits);
        let missing = match self.last {
            Some(last) => gap(last, sequence, self.bits),
            None => 0,
        };
        if missing > 0 {
            self.lost += missing as u64;
            self.gaps += 1;
        }
        self.last = Some(sequence);
        missing
    }

    /// Total events inferred lost so far
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Number of discontinuities seen
    pub fn gaps(&self) -> u64 {
        self.gaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_kind() {
        let tagger = SequenceTagger::new();
        assert_eq!(tagger.next(EventKind::Mouse), 0);
        assert_eq!(tagger.next(EventKind::Mouse), 1);
        assert_eq!(tagger.next(EventKind::Key), 0);
        assert_eq!(tagger.next(EventKind::Mouse), 2);
        assert_eq!(tagger.peek(EventKind::Wheel), 0);
        assert_eq!(tagger.peek(EventKind::Mouse), 3);
    }

    #[test]
    fn test_counter_wraps() {
        let tagger = SequenceTagger::new();
        tagger.counters[EventKind::Key.index()].store(u32::MAX, Ordering::Relaxed);
        assert_eq!(tagger.next(EventKind::Key), u32::MAX);
        assert_eq!(tagger.next(EventKind::Key), 0);
    }

    #[test]
    fn test_wire_truncates_mouse_only() {
        assert_eq!(wire(EventKind::Mouse, 0x1_02), 0x02);
        assert_eq!(wire(EventKind::Key, 0x1_02), 0x1_02);
        assert_eq!(wire(EventKind::Wheel, u32::MAX), u32::MAX);
    }

    #[test]
    fn test_gap_consecutive_is_zero() {
        assert_eq!(gap(4, 5, 8), 0);
        assert_eq!(gap(255, 0, 8), 0);
        assert_eq!(gap(u32::MAX, 0, 32), 0);
    }

    #[test]
    fn test_gap_counts_missing() {
        assert_eq!(gap(4, 8, 8), 3);
        // Wrapped jump: 250 -> 3 skips 251..=255 and 0..=2
        assert_eq!(gap(250, 3, 8), 8);
    }

    #[test]
    fn test_gap_tracker_accumulates() {
        let mut tracker = GapTracker::new(EventKind::Mouse);
        for seq in [253u32, 254, 255, 0, 1, 5, 6] {
            tracker.observe(seq);
        }
        assert_eq!(tracker.lost(), 3);
        assert_eq!(tracker.gaps(), 1);
    }

    #[test]
    fn test_gap_tracker_masks_full_sequences() {
        let mut tracker = GapTracker::new(EventKind::Mouse);
        assert_eq!(tracker.observe(0x1FF), 0);
        assert_eq!(tracker.observe(0x200), 0);
        assert_eq!(tracker.lost(), 0);
    }
}
