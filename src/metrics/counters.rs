use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle to a monotonic counter.
///
/// Clones share the same underlying value, so a handle can be passed into a
/// tracker while reporters read the total concurrently. Increments are atomic;
/// readers see weakly consistent values.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The three delivery-error counters fed by sequence trackers.
#[derive(Clone, Debug, Default)]
pub struct SequenceErrorCounters {
    pub out_of_seq: Counter,
    pub duplicate: Counter,
    pub loss: Counter,
}

impl SequenceErrorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no delivery error of any kind has been recorded.
    pub fn is_clean(&self) -> bool {
        self.out_of_seq.count() == 0 && self.duplicate.count() == 0 && self.loss.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let c = Counter::new();
        let c2 = c.clone();
        c.inc(3);
        c2.inc(2);
        assert_eq!(c.count(), 5);
        assert_eq!(c2.count(), 5);
    }

    #[test]
    fn clean_until_first_increment() {
        let counters = SequenceErrorCounters::new();
        assert!(counters.is_clean());
        counters.loss.inc(1);
        assert!(!counters.is_clean());
    }
}
