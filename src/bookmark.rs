//! Resume points
//!
//! The block each learner last opened, kept in the data directory so a
//! later process (one-shot commands included) can continue from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::BlockId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmarks {
    #[serde(default)]
    last_viewed: BTreeMap<String, BlockId>,
}

impl Bookmarks {
    /// Read a bookmark file; a missing file is an empty set
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).context("Failed to read bookmark file")?;
        serde_json::from_str(&contents).context("Failed to parse bookmark file")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize bookmarks")?;
        fs::write(path, contents).context("Failed to write bookmark file")?;
        Ok(())
    }

    pub fn last_viewed(&self, user_id: &str) -> Option<&BlockId> {
        self.last_viewed.get(user_id)
    }

    /// Record or forget a learner's resume point
    pub fn record(&mut self, user_id: &str, block: Option<BlockId>) {
        match block {
            Some(block) => {
                self.last_viewed.insert(user_id.to_string(), block);
            }
            None => {
                self.last_viewed.remove(user_id);
            }
        }
    }
}

pub fn bookmark_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("bookmarks.json"))
}

/// Resume point stored for a learner
pub fn load_last_viewed(user_id: &str) -> Result<Option<BlockId>> {
    let bookmarks = Bookmarks::load_from(&bookmark_path()?)?;
    Ok(bookmarks.last_viewed(user_id).cloned())
}

pub fn save_last_viewed(user_id: &str, block: Option<BlockId>) -> Result<()> {
    let path = bookmark_path()?;
    let mut bookmarks = Bookmarks::load_from(&path)?;
    if bookmarks.last_viewed(user_id) == block.as_ref() {
        return Ok(());
    }
    bookmarks.record(user_id, block);
    bookmarks.save_to(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bookmarks = Bookmarks::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(bookmarks, Bookmarks::default());
    }

    #[test]
    fn test_resume_points_are_per_learner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bookmarks.json");

        let mut bookmarks = Bookmarks::default();
        bookmarks.record("u1", Some("b3".into()));
        bookmarks.record("u2", Some("b1".into()));
        bookmarks.save_to(&path).unwrap();

        let mut restored = Bookmarks::load_from(&path).unwrap();
        assert_eq!(restored.last_viewed("u1").map(String::as_str), Some("b3"));
        assert_eq!(restored.last_viewed("u2").map(String::as_str), Some("b1"));

        restored.record("u1", None);
        assert!(restored.last_viewed("u1").is_none());
        assert!(restored.last_viewed("u3").is_none());
    }
}
