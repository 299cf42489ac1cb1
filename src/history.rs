use crate::segment::Segment;
use crate::types::{MidiMessage, TimedMessage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One captured input with whatever it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Seconds since the UNIX epoch at capture time.
    pub wall_time: f64,
    pub input: MidiMessage,
    /// The segment fired by this input, for triggering note-ons.
    pub segment: Option<Segment>,
    /// Body messages submitted to the dispatch scheduler (segment-local
    /// ticks, pre-scaling).
    pub scheduled: Vec<TimedMessage>,
}

impl HistoryEntry {
    /// Stamp an entry at the current wall-clock time.
    pub fn now(input: MidiMessage, segment: Option<Segment>, scheduled: Vec<TimedMessage>) -> Self {
        Self {
            wall_time: epoch_seconds(),
            input,
            segment,
            scheduled,
        }
    }
}

pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Performance history shared between the capture thread (writer) and the
/// scheduled cleanup task (pruner).
///
/// Bounded mode caps the entry count for long rehearsals; unbounded mode is
/// used when full-session persistence was requested, in which case entries
/// are never pruned.
#[derive(Clone)]
pub struct PerformanceHistory {
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
    max_len: Option<usize>,
}

impl PerformanceHistory {
    pub fn bounded(max_len: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_len: Some(max_len),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            max_len: None,
        }
    }

    pub fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(entry);
        if let Some(max) = self.max_len {
            while entries.len() > max {
                entries.pop_front();
            }
        }
    }

    /// Drop entries older than `retention`. Returns how many were removed.
    pub fn prune_older_than(&self, retention: Duration) -> usize {
        let cutoff = epoch_seconds() - retention.as_secs_f64();
        let mut entries = self.entries.lock().unwrap();
        let mut removed = 0;
        while entries.front().is_some_and(|e| e.wall_time < cutoff) {
            entries.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Copy of the entries, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}
