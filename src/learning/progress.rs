//! Learner progress
//!
//! Two id sets: blocks the learner completed and blocks for which points were
//! already granted. `awarded` is always a subset of `completed`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::BlockId;

/// Persisted progress layout. Order is irrelevant; only membership matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(default)]
    pub completed: Vec<BlockId>,
    #[serde(default)]
    pub awarded: Vec<BlockId>,
}

impl ProgressSnapshot {
    /// Compare as sets
    pub fn same_sets(&self, other: &ProgressSnapshot) -> bool {
        let as_set = |v: &[BlockId]| v.iter().cloned().collect::<HashSet<_>>();
        as_set(&self.completed) == as_set(&other.completed) && as_set(&self.awarded) == as_set(&other.awarded)
    }
}

/// In-memory progress of the signed-in learner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    completed: HashSet<BlockId>,
    awarded: HashSet<BlockId>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted data, dropping awarded ids that were never completed
    pub fn from_snapshot(snapshot: ProgressSnapshot) -> Self {
        let completed: HashSet<BlockId> = snapshot.completed.into_iter().collect();
        let mut awarded: HashSet<BlockId> = snapshot.awarded.into_iter().collect();
        let before = awarded.len();
        awarded.retain(|id| completed.contains(id));
        if awarded.len() != before {
            warn!("Dropped {} awarded block ids without a matching completion", before - awarded.len());
        }
        Self { completed, awarded }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut completed: Vec<BlockId> = self.completed.iter().cloned().collect();
        let mut awarded: Vec<BlockId> = self.awarded.iter().cloned().collect();
        completed.sort();
        awarded.sort();
        ProgressSnapshot { completed, awarded }
    }

    pub fn is_completed(&self, block_id: &str) -> bool {
        self.completed.contains(block_id)
    }

    pub fn is_awarded(&self, block_id: &str) -> bool {
        self.awarded.contains(block_id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn awarded_count(&self) -> usize {
        self.awarded.len()
    }

    pub fn completed(&self) -> &HashSet<BlockId> {
        &self.completed
    }

    pub fn awarded(&self) -> &HashSet<BlockId> {
        &self.awarded
    }

    /// Mark a block complete. Returns false if it already was.
    pub fn mark_completed(&mut self, block_id: &str) -> bool {
        self.completed.insert(block_id.to_string())
    }

    /// Record a point award. The block must already be completed.
    pub fn mark_awarded(&mut self, block_id: &str) -> bool {
        if !self.completed.contains(block_id) {
            return false;
        }
        self.awarded.insert(block_id.to_string())
    }

    /// Undo a completion together with its award
    pub fn unmark(&mut self, block_id: &str) {
        self.awarded.remove(block_id);
        self.completed.remove(block_id);
    }

    pub fn clear(&mut self) {
        self.completed.clear();
        self.awarded.clear();
    }
}
