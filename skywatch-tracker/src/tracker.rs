//! Contact tracker
//!
//! Decides whether a hex is new, queues first-sighting rows for the cycle's
//! batched append, and keeps the latest sample per hex for the delta rules.
//!
//! The store is the source of truth for "seen ever". The runtime memory only
//! lives for the current process and only answers for the previous cycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use skywatch_core::{Anomaly, Sample};

use crate::{ContactLog, ContactRecord};

/// The latest sample kept for a hex
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub sample: Sample,
    /// Cycle number the sample was observed in
    pub cycle: u64,
    /// Wall-clock time of the observation
    pub seen_at: DateTime<Utc>,
}

/// Per-run map from hex to its most recent in-zone sample
#[derive(Debug, Default)]
pub struct RuntimeMemory {
    entries: HashMap<String, MemoryEntry>,
}

impl RuntimeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hex: &str) -> Option<&MemoryEntry> {
        self.entries.get(hex)
    }

    /// The entry for `hex` only if it was observed in the cycle right before `cycle`
    pub fn previous(&self, hex: &str, cycle: u64) -> Option<&MemoryEntry> {
        self.entries
            .get(hex)
            .filter(|entry| entry.cycle.checked_add(1) == Some(cycle))
    }

    /// Replace the stored sample for its hex
    pub fn remember(&mut self, sample: Sample, cycle: u64, seen_at: DateTime<Utc>) {
        self.entries.insert(
            sample.hex.clone(),
            MemoryEntry {
                sample,
                cycle,
                seen_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// First-sighting tracker over a durable contact log
pub struct ContactTracker {
    log: Box<dyn ContactLog>,
    known: HashMap<String, ContactRecord>,
    pending: Vec<ContactRecord>,
    memory: RuntimeMemory,
}

impl ContactTracker {
    /// Load the known set from `log`.
    ///
    /// An unreadable store is logged and treated as empty.
    pub fn open(mut log: Box<dyn ContactLog>) -> Self {
        let mut known = HashMap::new();
        match log.load() {
            Ok(records) => {
                for record in records {
                    known.entry(record.hex.clone()).or_insert(record);
                }
                info!("Loaded {} known contacts from {}", known.len(), log.describe());
            }
            Err(e) => warn!("Could not read contact store {}: {}", log.describe(), e),
        }

        Self {
            log,
            known,
            pending: Vec::new(),
            memory: RuntimeMemory::new(),
        }
    }

    /// Has this hex ever been recorded
    pub fn contains(&self, hex: &str) -> bool {
        self.known.contains_key(hex)
    }

    pub fn get(&self, hex: &str) -> Option<&ContactRecord> {
        self.known.get(hex)
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Rows waiting for the next [`ContactTracker::flush`]
    pub fn pending(&self) -> &[ContactRecord] {
        &self.pending
    }

    /// Record a sighting; returns `true` the first time a hex is seen.
    ///
    /// New hexes are marked seen immediately, so a duplicate within the same
    /// cycle is not new either.
    pub fn observe(&mut self, sample: &Sample, notes: &[Anomaly], now: DateTime<Utc>) -> bool {
        if self.known.contains_key(&sample.hex) {
            return false;
        }

        let record = ContactRecord::from_sample(sample, notes, now);
        self.pending.push(record.clone());
        self.known.insert(sample.hex.clone(), record);
        true
    }

    /// Append queued rows in one batch and return how many were written.
    ///
    /// On failure the rows are dropped and the in-memory seen state is kept.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let batch = std::mem::take(&mut self.pending);
        match self.log.append(&batch) {
            Ok(()) => batch.len(),
            Err(e) => {
                warn!(
                    "Failed to append {} contacts to {}: {}",
                    batch.len(),
                    self.log.describe(),
                    e
                );
                0
            }
        }
    }

    pub fn memory(&self) -> &RuntimeMemory {
        &self.memory
    }

    /// Store `sample` as the latest for its hex
    pub fn remember(&mut self, sample: Sample, cycle: u64, seen_at: DateTime<Utc>) {
        self.memory.remember(sample, cycle, seen_at);
    }
}
