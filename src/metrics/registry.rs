//! Per-topic tracker registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::metrics::counters::SequenceErrorCounters;
use crate::metrics::tracker::ReceivedMessageSequenceTracker;

/// Shared handle to a single topic's tracker. The mutex is uncontended in
/// practice: one consumer owns each topic's reception.
pub type TrackerHandle = Arc<Mutex<ReceivedMessageSequenceTracker>>;

/// Maps topic name to its sequence tracker, creating trackers lazily on first
/// observation. All trackers created by one registry feed the same three
/// counters, so a consumer's topics aggregate into one set of totals.
pub struct TrackerRegistry {
    counters: SequenceErrorCounters,
    trackers: Mutex<HashMap<String, TrackerHandle>>,
}

impl TrackerRegistry {
    pub fn new(counters: SequenceErrorCounters) -> Self {
        Self {
            counters,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the tracker for a topic, creating it on first use.
    pub fn tracker_for(&self, topic: &str) -> TrackerHandle {
        let mut trackers = self.trackers.lock().unwrap();
        if let Some(tracker) = trackers.get(topic) {
            return tracker.clone();
        }
        let tracker = Arc::new(Mutex::new(ReceivedMessageSequenceTracker::new(
            self.counters.out_of_seq.clone(),
            self.counters.duplicate.clone(),
            self.counters.loss.clone(),
        )));
        trackers.insert(topic.to_string(), tracker.clone());
        tracker
    }

    /// Close every known tracker, flushing pending windows into the loss
    /// counter. Safe to call more than once.
    pub fn close_all(&self) {
        let trackers = self.trackers.lock().unwrap();
        for tracker in trackers.values() {
            tracker.lock().unwrap().close();
        }
    }

    /// True once every tracker has confirmed its advisory target. Topics that
    /// never saw a target advisory report false.
    pub fn all_reached_target(&self) -> bool {
        let trackers = self.trackers.lock().unwrap();
        !trackers.is_empty()
            && trackers
                .values()
                .all(|t| t.lock().unwrap().reached_target())
    }

    pub fn counters(&self) -> &SequenceErrorCounters {
        &self.counters
    }

    pub fn topic_count(&self) -> usize {
        self.trackers.lock().unwrap().len()
    }
}
