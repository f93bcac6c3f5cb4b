//! Windowed sequence tracker for delivery verification.
//!
//! The publisher stamps each message with a sequence number counting up from
//! zero. One tracker per topic reconciles the received stream against that
//! ground truth and classifies every anomaly as loss, duplication, or
//! out-of-order delivery. A bounded reordering window lets the tracker bridge
//! transient reorderings without reporting them as errors.

use std::collections::BTreeSet;

use crate::metrics::counters::Counter;

/// Maximum number of sequence numbers parked ahead of the frontier. Bounds
/// memory and bounds how far a reordering can stretch before the skipped
/// slots are written off as lost.
pub const MAX_TRACK_OUT_OF_ORDER: usize = 1000;

/// Per-topic sequence classifier.
///
/// `expected_number` is the highest sequence number confirmed in order (the
/// frontier). Numbers arriving ahead of the frontier are parked in `pending`
/// until the gap fills, the window overflows, or [`close`](Self::close) runs.
///
/// Classification of an incoming number `n`:
/// - `n < expected_number`: out-of-seq. The slot was already confirmed or
///   written off as lost, so this is a late straggler.
/// - `n == expected_number` or `n` already pending: duplicate.
/// - `n == expected_number + 1`: the frontier advances, then keeps advancing
///   through any consecutive pending numbers.
/// - `n > expected_number + 1`: parked in the window. If the window exceeds
///   [`MAX_TRACK_OUT_OF_ORDER`], the slots below the lowest pending number
///   are counted as lost and the frontier jumps forward.
///
/// A reordering the window resolves counts as nothing at all. Not
/// thread-safe; the owning consumer must serialize calls.
#[derive(Debug)]
pub struct ReceivedMessageSequenceTracker {
    expected_number: i64,
    pending: BTreeSet<i64>,
    target: Option<i64>,
    out_of_seq_counter: Counter,
    duplicate_counter: Counter,
    loss_counter: Counter,
}

impl ReceivedMessageSequenceTracker {
    pub fn new(out_of_seq: Counter, duplicate: Counter, loss: Counter) -> Self {
        Self {
            expected_number: -1,
            pending: BTreeSet::new(),
            target: None,
            out_of_seq_counter: out_of_seq,
            duplicate_counter: duplicate,
            loss_counter: loss,
        }
    }

    /// Feed one observed sequence number.
    pub fn sequence_number_received(&mut self, number: i64) {
        if self.expected_number == -1 {
            // First observation sets the baseline; the stream may start anywhere.
            self.expected_number = number - 1;
        }
        if number < self.expected_number {
            self.out_of_seq_counter.inc(1);
            return;
        }
        if number == self.expected_number {
            self.duplicate_counter.inc(1);
            return;
        }
        if number == self.expected_number + 1 {
            self.expected_number = number;
            self.drain_consecutive_pending();
            return;
        }
        if !self.pending.insert(number) {
            self.duplicate_counter.inc(1);
            return;
        }
        while self.pending.len() > MAX_TRACK_OUT_OF_ORDER {
            self.flush_lowest_pending();
        }
    }

    /// Record the advisory maximum sequence number the producer intends to
    /// send. At close, slots between the final frontier and this target are
    /// counted as lost; without it a lost tail is undetectable.
    pub fn target_sequence_number(&mut self, number: i64) {
        match self.target {
            Some(t) if t >= number => {}
            _ => self.target = Some(number),
        }
    }

    /// True once the frontier has confirmed the advisory target.
    pub fn reached_target(&self) -> bool {
        self.target.map_or(false, |t| self.expected_number >= t)
    }

    /// Finalize the tracker: every gap still open in the pending window is a
    /// definite loss, as is any tail missing up to the advisory target.
    /// Calling close on an already-closed tracker is a no-op.
    pub fn close(&mut self) {
        if let Some(&highest) = self.pending.iter().next_back() {
            let missing = (highest - self.expected_number) - self.pending.len() as i64;
            if missing > 0 {
                self.loss_counter.inc(missing as u64);
            }
            self.expected_number = highest;
            self.pending.clear();
        }
        if let Some(target) = self.target {
            if target > self.expected_number {
                self.loss_counter.inc((target - self.expected_number) as u64);
                self.expected_number = target;
            }
        }
    }

    /// Highest sequence number confirmed in order, -1 before the first
    /// observation.
    #[inline]
    pub fn frontier(&self) -> i64 {
        self.expected_number
    }

    /// Number of sequence numbers currently parked ahead of the frontier.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn drain_consecutive_pending(&mut self) {
        while self.pending.remove(&(self.expected_number + 1)) {
            self.expected_number += 1;
        }
    }

    fn flush_lowest_pending(&mut self) {
        if let Some(lowest) = self.pending.pop_first() {
            self.loss_counter
                .inc((lowest - (self.expected_number + 1)) as u64);
            self.expected_number = lowest;
            self.drain_consecutive_pending();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::counters::SequenceErrorCounters;

    fn tracker_with_counters() -> (ReceivedMessageSequenceTracker, SequenceErrorCounters) {
        let counters = SequenceErrorCounters::new();
        let tracker = ReceivedMessageSequenceTracker::new(
            counters.out_of_seq.clone(),
            counters.duplicate.clone(),
            counters.loss.clone(),
        );
        (tracker, counters)
    }

    #[test]
    fn counters_stay_zero_without_gaps() {
        let (mut tracker, counters) = tracker_with_counters();
        for n in 0..100 {
            tracker.sequence_number_received(n);
        }
        tracker.close();
        assert_eq!(counters.out_of_seq.count(), 0);
        assert_eq!(counters.duplicate.count(), 0);
        assert_eq!(counters.loss.count(), 0);
    }

    #[test]
    fn detects_lost_messages() {
        for total in [10i64, 11, 19, 20, 21, 100] {
            let (mut tracker, counters) = tracker_with_counters();
            let mut lost = 0;
            for n in 0..total {
                if n % 2 == 1 {
                    lost += 1;
                    continue;
                }
                tracker.sequence_number_received(n);
            }
            if total % 2 == 0 {
                tracker.sequence_number_received(total);
            }
            tracker.close();
            assert_eq!(counters.out_of_seq.count(), 0);
            assert_eq!(counters.duplicate.count(), 0);
            assert_eq!(counters.loss.count(), lost, "total={total}");
        }
    }

    #[test]
    fn detects_duplicated_messages() {
        for total in [10i64, 11, 19, 20, 21, 100] {
            let (mut tracker, counters) = tracker_with_counters();
            let mut duplicated = 0;
            for n in 0..total {
                if n % 2 == 1 {
                    duplicated += 1;
                    tracker.sequence_number_received(n);
                }
                tracker.sequence_number_received(n);
            }
            if total % 2 == 0 {
                tracker.sequence_number_received(total);
            }
            tracker.close();
            assert_eq!(counters.out_of_seq.count(), 0);
            assert_eq!(counters.duplicate.count(), duplicated, "total={total}");
            assert_eq!(counters.loss.count(), 0);
        }
    }

    #[test]
    fn window_resolves_single_swap() {
        let (mut tracker, counters) = tracker_with_counters();
        for n in 0..=10 {
            tracker.sequence_number_received(n);
        }
        tracker.sequence_number_received(12);
        tracker.sequence_number_received(11);
        for n in 13..100 {
            tracker.sequence_number_received(n);
        }
        tracker.close();
        assert_eq!(counters.out_of_seq.count(), 0);
        assert_eq!(counters.duplicate.count(), 0);
        assert_eq!(counters.loss.count(), 0);
    }

    #[test]
    fn window_resolves_wider_reordering() {
        let (mut tracker, counters) = tracker_with_counters();
        for n in 0..=10 {
            tracker.sequence_number_received(n);
        }
        for n in [14, 13, 11, 12] {
            tracker.sequence_number_received(n);
        }
        for n in 15..100 {
            tracker.sequence_number_received(n);
        }
        tracker.close();
        assert_eq!(counters.out_of_seq.count(), 0);
        assert_eq!(counters.duplicate.count(), 0);
        assert_eq!(counters.loss.count(), 0);
    }

    #[test]
    fn window_overflow_declares_skipped_slot_lost() {
        let (mut tracker, counters) = tracker_with_counters();
        tracker.sequence_number_received(0);
        // Skip 1, then fill the window one past its capacity.
        for n in 2..=(2 + MAX_TRACK_OUT_OF_ORDER as i64) {
            tracker.sequence_number_received(n);
        }
        assert_eq!(counters.loss.count(), 1);
        assert_eq!(tracker.pending_len(), 0);
        tracker.close();
        assert_eq!(counters.out_of_seq.count(), 0);
        assert_eq!(counters.duplicate.count(), 0);
        assert_eq!(counters.loss.count(), 1);
    }

    #[test]
    fn straggler_after_overflow_counts_out_of_seq() {
        let (mut tracker, counters) = tracker_with_counters();
        tracker.sequence_number_received(0);
        for n in 2..=(2 + MAX_TRACK_OUT_OF_ORDER as i64) {
            tracker.sequence_number_received(n);
        }
        assert_eq!(counters.loss.count(), 1);
        // Slot 1 was written off; its late arrival is out-of-seq, not duplicate.
        tracker.sequence_number_received(1);
        tracker.close();
        assert_eq!(counters.out_of_seq.count(), 1);
        assert_eq!(counters.duplicate.count(), 0);
        assert_eq!(counters.loss.count(), 1);
    }

    #[test]
    fn repeated_number_counts_once_per_repeat() {
        let (mut tracker, counters) = tracker_with_counters();
        tracker.sequence_number_received(0);
        for _ in 0..5 {
            tracker.sequence_number_received(0);
        }
        tracker.sequence_number_received(2);
        tracker.sequence_number_received(2);
        tracker.close();
        assert_eq!(counters.duplicate.count(), 6);
        assert_eq!(counters.loss.count(), 1);
    }

    #[test]
    fn baseline_starts_at_first_observation() {
        let (mut tracker, counters) = tracker_with_counters();
        for n in 5..20 {
            tracker.sequence_number_received(n);
        }
        tracker.close();
        assert_eq!(tracker.frontier(), 19);
        assert!(counters.is_clean());
    }

    #[test]
    fn close_flushes_open_gaps() {
        let (mut tracker, counters) = tracker_with_counters();
        for n in [0, 1, 2, 5, 9] {
            tracker.sequence_number_received(n);
        }
        tracker.close();
        // 3, 4, 6, 7, 8 never arrived.
        assert_eq!(counters.loss.count(), 5);
        assert_eq!(tracker.frontier(), 9);
        assert_eq!(tracker.pending_len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut tracker, counters) = tracker_with_counters();
        for n in [0, 1, 4] {
            tracker.sequence_number_received(n);
        }
        tracker.close();
        let after_first = (
            counters.out_of_seq.count(),
            counters.duplicate.count(),
            counters.loss.count(),
        );
        tracker.close();
        let after_second = (
            counters.out_of_seq.count(),
            counters.duplicate.count(),
            counters.loss.count(),
        );
        assert_eq!(after_first, after_second);
        assert_eq!(after_first.2, 2);
    }

    #[test]
    fn close_flushes_tail_up_to_target() {
        let (mut tracker, counters) = tracker_with_counters();
        tracker.target_sequence_number(9);
        for n in 0..7 {
            tracker.sequence_number_received(n);
        }
        assert!(!tracker.reached_target());
        tracker.close();
        // 7, 8, 9 were never received.
        assert_eq!(counters.loss.count(), 3);
        assert_eq!(tracker.frontier(), 9);
    }

    #[test]
    fn target_reached_disables_tail_loss() {
        let (mut tracker, counters) = tracker_with_counters();
        tracker.target_sequence_number(9);
        for n in 0..10 {
            tracker.sequence_number_received(n);
        }
        assert!(tracker.reached_target());
        tracker.close();
        assert!(counters.is_clean());
    }

    #[test]
    fn empty_stream_with_target_is_all_loss() {
        let (mut tracker, counters) = tracker_with_counters();
        tracker.target_sequence_number(99);
        tracker.close();
        assert_eq!(counters.loss.count(), 100);
    }
}
