//! Unlock gating
//!
//! Blocks form one global chain across the whole curriculum: a block opens
//! once the block before it in the flattened sequence is completed. A
//! category opens once every block of the category before it is completed.
//! Unknown ids are locked.

use serde::{Deserialize, Serialize};

use super::{FlatBlockEntry, LearningMap, ProgressState};

/// What to do when the preceding category has no blocks at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPredecessorPolicy {
    /// An empty predecessor does not block progress
    #[default]
    Open,
    /// An empty predecessor keeps the category locked
    Closed,
}

/// Read-only view over the curriculum and the learner's progress
#[derive(Debug, Clone, Copy)]
pub struct UnlockEvaluator<'a> {
    map: &'a LearningMap,
    progress: &'a ProgressState,
    policy: EmptyPredecessorPolicy,
}

impl<'a> UnlockEvaluator<'a> {
    pub fn new(map: &'a LearningMap, progress: &'a ProgressState) -> Self {
        Self { map, progress, policy: EmptyPredecessorPolicy::default() }
    }

    pub fn with_policy(mut self, policy: EmptyPredecessorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_category_unlocked(&self, category_id: &str) -> bool {
        let idx = match self.map.category_index(category_id) {
            Some(idx) => idx,
            None => return false,
        };
        if idx == 0 {
            return true;
        }

        let previous = &self.map.categories()[idx - 1];
        let mut previous_blocks = self.map.blocks_in_category(&previous.id).peekable();
        if previous_blocks.peek().is_none() {
            return self.policy == EmptyPredecessorPolicy::Open;
        }
        previous_blocks.all(|entry| self.progress.is_completed(entry.id()))
    }

    pub fn is_block_unlocked(&self, block_id: &str) -> bool {
        match self.map.position(block_id) {
            Some(0) => true,
            Some(idx) => self.progress.is_completed(self.map.flat()[idx - 1].id()),
            None => false,
        }
    }

    /// First block in the whole sequence the learner has not completed
    pub fn first_incomplete(&self) -> Option<&'a FlatBlockEntry> {
        self.map.flat().iter().find(|entry| !self.progress.is_completed(entry.id()))
    }

    /// Block to open when entering a chapter: the first unlocked incomplete
    /// block of the chapter, otherwise the chapter's first block
    pub fn entry_block_for_chapter(&self, chapter_id: &str) -> Option<&'a FlatBlockEntry> {
        let map: &'a LearningMap = self.map;
        map.blocks_in_chapter(chapter_id)
            .find(|entry| self.is_block_unlocked(entry.id()) && !self.progress.is_completed(entry.id()))
            .or_else(|| map.blocks_in_chapter(chapter_id).next())
    }

    pub fn is_chapter_complete(&self, chapter_id: &str) -> bool {
        let mut blocks = self.map.blocks_in_chapter(chapter_id).peekable();
        blocks.peek().is_some() && blocks.all(|entry| self.progress.is_completed(entry.id()))
    }

    /// Completion percentage of a category, rounded; 0 for an empty category
    pub fn category_progress(&self, category_id: &str) -> u8 {
        let (done, total) = self
            .map
            .blocks_in_category(category_id)
            .fold((0usize, 0usize), |(done, total), entry| {
                (done + usize::from(self.progress.is_completed(entry.id())), total + 1)
            });
        percentage(done, total)
    }

    /// Completion percentage over the whole curriculum
    pub fn overall_progress(&self) -> u8 {
        let done = self
            .map
            .flat()
            .iter()
            .filter(|entry| self.progress.is_completed(entry.id()))
            .count();
        percentage(done, self.map.total_blocks())
    }
}

fn percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{Block, Category, Chapter, Section};

    fn category(id: &str, blocks: &[&str]) -> Category {
        let chapters = if blocks.is_empty() {
            vec![]
        } else {
            vec![Chapter {
                id: format!("{id}-ch"),
                title: format!("{id} chapter"),
                sections: vec![Section {
                    id: format!("{id}-sec"),
                    title: "Section".into(),
                    order: 1,
                    blocks: blocks
                        .iter()
                        .map(|b| Block { id: b.to_string(), title: b.to_string(), ..Default::default() })
                        .collect(),
                }],
                ..Default::default()
            }]
        };
        Category { id: id.into(), title: id.into(), chapters, ..Default::default() }
    }

    #[test]
    fn test_block_chain_is_global() {
        let map = LearningMap::new(vec![category("c1", &["b1", "b2"]), category("c2", &["b3"])]);
        let mut progress = ProgressState::new();

        let eval = UnlockEvaluator::new(&map, &progress);
        assert!(eval.is_block_unlocked("b1"));
        assert!(!eval.is_block_unlocked("b2"));
        assert!(!eval.is_block_unlocked("b3"));
        assert!(!eval.is_block_unlocked("nope"));

        progress.mark_completed("b2");
        let eval = UnlockEvaluator::new(&map, &progress);
        assert!(eval.is_block_unlocked("b3"), "first block of next chapter gates on last of previous");
        assert!(!eval.is_block_unlocked("b2"));
    }

    #[test]
    fn test_first_block_always_unlocked() {
        let map = LearningMap::new(vec![category("c1", &["b1", "b2"])]);
        let mut progress = ProgressState::new();
        progress.mark_completed("b1");
        progress.mark_completed("b2");
        assert!(UnlockEvaluator::new(&map, &progress).is_block_unlocked("b1"));
    }

    #[test]
    fn test_category_gate() {
        let map = LearningMap::new(vec![category("c1", &["b1", "b2"]), category("c2", &["b3"])]);
        let mut progress = ProgressState::new();
        assert!(UnlockEvaluator::new(&map, &progress).is_category_unlocked("c1"));
        assert!(!UnlockEvaluator::new(&map, &progress).is_category_unlocked("c2"));
        assert!(!UnlockEvaluator::new(&map, &progress).is_category_unlocked("unknown"));

        progress.mark_completed("b1");
        assert!(!UnlockEvaluator::new(&map, &progress).is_category_unlocked("c2"));
        progress.mark_completed("b2");
        assert!(UnlockEvaluator::new(&map, &progress).is_category_unlocked("c2"));
    }

    #[test]
    fn test_empty_predecessor_policy() {
        let map = LearningMap::new(vec![category("c1", &[]), category("c2", &["b1"])]);
        let progress = ProgressState::new();

        let open = UnlockEvaluator::new(&map, &progress);
        assert!(open.is_category_unlocked("c2"));

        let closed = open.with_policy(EmptyPredecessorPolicy::Closed);
        assert!(!closed.is_category_unlocked("c2"));
    }

    #[test]
    fn test_first_incomplete_and_percentages() {
        let map = LearningMap::new(vec![category("c1", &["b1", "b2", "b3"]), category("c2", &[])]);
        let mut progress = ProgressState::new();
        assert_eq!(UnlockEvaluator::new(&map, &progress).first_incomplete().map(|e| e.id()), Some("b1"));

        progress.mark_completed("b1");
        let eval = UnlockEvaluator::new(&map, &progress);
        assert_eq!(eval.first_incomplete().map(|e| e.id()), Some("b2"));
        assert_eq!(eval.category_progress("c1"), 33);
        assert_eq!(eval.category_progress("c2"), 0);
        assert_eq!(eval.overall_progress(), 33);

        progress.mark_completed("b2");
        progress.mark_completed("b3");
        let eval = UnlockEvaluator::new(&map, &progress);
        assert!(eval.first_incomplete().is_none());
        assert!(eval.is_chapter_complete("c1-ch"));
        assert_eq!(eval.category_progress("c1"), 100);
    }

    #[test]
    fn test_entry_block_for_chapter() {
        let map = LearningMap::new(vec![category("c1", &["b1", "b2"])]);
        let mut progress = ProgressState::new();
        progress.mark_completed("b1");
        let eval = UnlockEvaluator::new(&map, &progress);
        assert_eq!(eval.entry_block_for_chapter("c1-ch").map(|e| e.id()), Some("b2"));

        progress.mark_completed("b2");
        let eval = UnlockEvaluator::new(&map, &progress);
        assert_eq!(eval.entry_block_for_chapter("c1-ch").map(|e| e.id()), Some("b1"));
        assert!(eval.entry_block_for_chapter("missing").is_none());
    }
}
