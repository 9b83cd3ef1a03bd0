//! Flattened learning tree
//!
//! Gating is defined over a linear sequence of blocks. The sequence is the
//! depth-first walk category → chapter → section → block in the order the
//! backend delivered siblings. Nothing is filtered and nothing is re-sorted.

use std::collections::HashMap;

use super::{Block, Category, Chapter};
use crate::types::{BlockId, ContentId};

/// A block together with the ids of its ancestors
#[derive(Debug, Clone, PartialEq)]
pub struct FlatBlockEntry {
    pub block: Block,
    pub section_id: ContentId,
    pub chapter_id: ContentId,
    pub category_id: ContentId,
}

impl FlatBlockEntry {
    pub fn id(&self) -> &str {
        &self.block.id
    }
}

/// Walk the tree and produce the flattened block sequence
pub fn flatten(categories: &[Category]) -> Vec<FlatBlockEntry> {
    let mut flat = Vec::new();
    for category in categories {
        for chapter in &category.chapters {
            for section in &chapter.sections {
                for block in &section.blocks {
                    flat.push(FlatBlockEntry {
                        block: block.clone(),
                        section_id: section.id.clone(),
                        chapter_id: chapter.id.clone(),
                        category_id: category.id.clone(),
                    });
                }
            }
        }
    }
    flat
}

/// The loaded curriculum: the nested tree and its flattened projection
#[derive(Debug, Clone, Default)]
pub struct LearningMap {
    categories: Vec<Category>,
    flat: Vec<FlatBlockEntry>,
    positions: HashMap<BlockId, usize>,
}

impl LearningMap {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut map = Self::default();
        map.replace_tree(categories);
        map
    }

    /// Replace the tree and rebuild the flattened sequence
    pub fn replace_tree(&mut self, categories: Vec<Category>) {
        let flat = flatten(&categories);
        let mut positions = HashMap::with_capacity(flat.len());
        for (idx, entry) in flat.iter().enumerate() {
            // First occurrence wins if the backend ever repeats an id
            positions.entry(entry.block.id.clone()).or_insert(idx);
        }
        self.categories = categories;
        self.flat = flat;
        self.positions = positions;
    }

    pub fn clear(&mut self) {
        self.categories.clear();
        self.flat.clear();
        self.positions.clear();
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn flat(&self) -> &[FlatBlockEntry] {
        &self.flat
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn total_blocks(&self) -> usize {
        self.flat.len()
    }

    /// Position of a block in the flattened sequence
    pub fn position(&self, block_id: &str) -> Option<usize> {
        self.positions.get(block_id).copied()
    }

    pub fn entry(&self, block_id: &str) -> Option<&FlatBlockEntry> {
        self.position(block_id).map(|idx| &self.flat[idx])
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == category_id)
    }

    /// Position of a category among its siblings
    pub fn category_index(&self, category_id: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.id == category_id)
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<(&Category, &Chapter)> {
        self.categories
            .iter()
            .find_map(|cat| cat.find_chapter(chapter_id).map(|ch| (cat, ch)))
    }

    pub fn blocks_in_category(&self, category_id: &str) -> impl Iterator<Item = &FlatBlockEntry> + '_ {
        let category_id = category_id.to_string();
        self.flat.iter().filter(move |e| e.category_id == category_id)
    }

    pub fn blocks_in_chapter(&self, chapter_id: &str) -> impl Iterator<Item = &FlatBlockEntry> + '_ {
        let chapter_id = chapter_id.to_string();
        self.flat.iter().filter(move |e| e.chapter_id == chapter_id)
    }

    /// Title used by "continue learning" prompts: "chapter - block"
    pub fn display_title(&self, entry: &FlatBlockEntry) -> String {
        match self.chapter(&entry.chapter_id) {
            Some((_, chapter)) => format!("{} - {}", chapter.title, entry.block.title),
            None => entry.block.title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::Section;

    fn block(id: &str, order: i64) -> Block {
        Block { id: id.into(), title: id.to_uppercase(), order, ..Default::default() }
    }

    fn sample_tree() -> Vec<Category> {
        vec![
            Category {
                id: "cat1".into(),
                title: "One".into(),
                order: 1,
                chapters: vec![
                    Chapter {
                        id: "ch1".into(),
                        title: "Ch1".into(),
                        order: 1,
                        sections: vec![
                            Section { id: "s1".into(), title: "S1".into(), order: 1, blocks: vec![block("b1", 1), block("b2", 2)] },
                            Section { id: "s2".into(), title: "S2".into(), order: 2, blocks: vec![] },
                        ],
                        ..Default::default()
                    },
                    Chapter {
                        id: "ch2".into(),
                        title: "Ch2".into(),
                        order: 2,
                        sections: vec![Section { id: "s3".into(), title: "S3".into(), order: 1, blocks: vec![block("b3", 1)] }],
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            Category { id: "cat2".into(), title: "Two".into(), order: 2, ..Default::default() },
            Category {
                id: "cat3".into(),
                title: "Three".into(),
                order: 3,
                chapters: vec![Chapter {
                    id: "ch3".into(),
                    title: "Ch3".into(),
                    sections: vec![Section { id: "s4".into(), title: "S4".into(), order: 1, blocks: vec![block("b4", 1)] }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_flatten_preserves_depth_first_order() {
        let flat = flatten(&sample_tree());
        let ids: Vec<&str> = flat.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["b1", "b2", "b3", "b4"]);

        assert_eq!(flat[2].chapter_id, "ch2");
        assert_eq!(flat[2].section_id, "s3");
        assert_eq!(flat[3].category_id, "cat3");
    }

    #[test]
    fn test_flatten_does_not_sort() {
        let mut tree = sample_tree();
        tree[0].chapters[0].sections[0].blocks = vec![block("late", 9), block("early", 1)];
        let flat = flatten(&tree);
        assert_eq!(flat[0].id(), "late");
        assert_eq!(flat[1].id(), "early");
    }

    #[test]
    fn test_map_lookups() {
        let map = LearningMap::new(sample_tree());
        assert_eq!(map.total_blocks(), 4);
        assert_eq!(map.position("b3"), Some(2));
        assert_eq!(map.position("missing"), None);
        assert_eq!(map.category_index("cat2"), Some(1));
        assert_eq!(map.blocks_in_category("cat1").count(), 3);
        assert_eq!(map.blocks_in_chapter("ch2").count(), 1);
        assert_eq!(map.blocks_in_category("cat2").count(), 0);

        let entry = map.entry("b3").unwrap();
        assert_eq!(map.display_title(entry), "Ch2 - B3");
    }

    #[test]
    fn test_replace_tree_rebuilds_sequence() {
        let mut map = LearningMap::new(sample_tree());
        map.replace_tree(vec![]);
        assert!(map.is_empty());
        assert_eq!(map.total_blocks(), 0);
        assert!(map.entry("b1").is_none());
    }
}
