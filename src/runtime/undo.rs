//! The transactional undo journal.
//!
//! Records accumulate after the most recent savepoint. Rolling back replays
//! the records of the current savepoint in reverse order of emission, then
//! discards that savepoint. The journal holds a bounded number of records
//! and savepoints; when either bound is reached the oldest savepoint is
//! discarded first.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::error::{VmError, VmResult};
use crate::runtime::{ObjectId, Value};

/// Record key reserved for "restore the element count". No slot index can
/// reach it because sequences hold at most 65535 elements.
pub const LENGTH_KEY: u32 = u32::MAX;

/// One reversible change to one object.
///
/// What `key` and `old_value` mean is up to the owning object: vectors use
/// a slot index with the slot's previous value, or [`LENGTH_KEY`] with the
/// previous element count; iterators store their previous cursor in `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoRecord {
    /// The object the record restores.
    pub owner: ObjectId,
    /// Owner-defined key.
    pub key: u32,
    /// Value captured before the change.
    pub old_value: Value,
}

impl UndoRecord {
    /// Builds a record for a slot overwrite.
    #[must_use]
    pub const fn slot(owner: ObjectId, index: usize, old_value: Value) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let key = index as u32;
        Self {
            owner,
            key,
            old_value,
        }
    }

    /// Builds a record for an element-count change.
    #[must_use]
    pub fn length(owner: ObjectId, old_count: usize) -> Self {
        Self {
            owner,
            key: LENGTH_KEY,
            old_value: Value::from_count(old_count),
        }
    }

    /// Returns `true` for element-count records.
    #[inline]
    #[must_use]
    pub const fn is_length(&self) -> bool {
        self.key == LENGTH_KEY
    }
}

/// Bounded stack of savepoints, each owning the records emitted after it.
#[derive(Debug, Clone)]
pub struct UndoJournal {
    records: VecDeque<UndoRecord>,
    /// Position in `records` at which each live savepoint starts, oldest first.
    savepoints: VecDeque<usize>,
    record_capacity: usize,
    max_savepoints: usize,
}

impl UndoJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new(record_capacity: usize, max_savepoints: usize) -> Self {
        Self {
            records: VecDeque::new(),
            savepoints: VecDeque::new(),
            record_capacity,
            max_savepoints: max_savepoints.max(1),
        }
    }

    /// Returns `true` while at least one savepoint exists.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.savepoints.is_empty()
    }

    /// Number of live savepoints.
    #[inline]
    #[must_use]
    pub fn savepoint_count(&self) -> usize {
        self.savepoints.len()
    }

    /// Number of records held across every savepoint.
    #[inline]
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Opens a new savepoint, discarding the oldest one when the limit has
    /// been reached.
    ///
    /// Objects must be told about the new savepoint separately; see
    /// [`Vm::create_savepoint`](crate::runtime::Vm::create_savepoint).
    pub fn create_savepoint(&mut self) {
        if self.savepoints.len() == self.max_savepoints {
            self.drop_oldest_savepoint();
        }
        self.savepoints.push_back(self.records.len());
        debug!(savepoints = self.savepoints.len(), "created undo savepoint");
    }

    /// Appends a record to the current savepoint.
    ///
    /// Does nothing when no savepoint is active.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::UndoJournalExhausted`] when the record cannot be
    /// stored even after every older savepoint has been discarded. The
    /// current savepoint is discarded too, because it can no longer be
    /// replayed completely.
    pub fn add_record(&mut self, record: UndoRecord) -> VmResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        while self.records.len() >= self.record_capacity {
            if self.savepoints.len() > 1 {
                self.drop_oldest_savepoint();
            } else {
                warn!(
                    capacity = self.record_capacity,
                    "undo journal exhausted; discarding current savepoint"
                );
                self.drop_undo();
                return Err(VmError::UndoJournalExhausted);
            }
        }
        trace!(owner = %record.owner, key = record.key, "undo record");
        self.records.push_back(record);
        Ok(())
    }

    /// Removes the current savepoint and returns its records newest first,
    /// ready to be applied in order.
    pub fn pop_savepoint(&mut self) -> Option<Vec<UndoRecord>> {
        let start = self.savepoints.pop_back()?;
        let replay: Vec<UndoRecord> = self.records.drain(start..).rev().collect();
        debug!(records = replay.len(), "rolling back to savepoint");
        Some(replay)
    }

    /// Discards every savepoint and record.
    pub fn drop_undo(&mut self) {
        self.records.clear();
        self.savepoints.clear();
    }

    /// Every pending record, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &UndoRecord> {
        self.records.iter()
    }

    /// Drops records whose owner no longer exists.
    pub fn retain_owners(&mut self, mut is_live: impl FnMut(ObjectId) -> bool) {
        let mut kept = VecDeque::with_capacity(self.records.len());
        let mut removed_before = Vec::with_capacity(self.records.len() + 1);
        let mut removed = 0;
        for record in self.records.drain(..) {
            removed_before.push(removed);
            if is_live(record.owner) {
                kept.push_back(record);
            } else {
                removed += 1;
            }
        }
        removed_before.push(removed);
        for start in &mut self.savepoints {
            *start -= removed_before[*start];
        }
        self.records = kept;
    }

    fn drop_oldest_savepoint(&mut self) {
        if self.savepoints.pop_front().is_none() {
            return;
        }
        let end = self.savepoints.front().copied().unwrap_or(self.records.len());
        self.records.drain(..end);
        for start in &mut self.savepoints {
            *start -= end;
        }
        warn!(dropped = end, "discarded oldest undo savepoint");
    }
}
