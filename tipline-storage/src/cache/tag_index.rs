//! Reverse index from tag to the keys carrying it.
//!
//! The index is owned by a [`Store`](super::Store) and mutated under the
//! same lock as the entry map, so a key is listed under a tag exactly when
//! its live entry carries that tag. Empty tag groups are dropped.

use std::collections::{BTreeSet, HashMap, HashSet};

use tipline_core::Tag;

#[derive(Debug, Default)]
pub struct TagIndex {
    index: HashMap<Tag, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under each of `tags`.
    pub fn add<'a>(&mut self, tags: impl IntoIterator<Item = &'a Tag>, key: &str) {
        for tag in tags {
            self.index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Remove `key` from each of `tags`, dropping groups that become empty.
    ///
    /// Callers pass the tag set of the entry being removed, which keeps
    /// removal proportional to the entry's tags instead of the index size.
    pub fn remove<'a>(&mut self, tags: impl IntoIterator<Item = &'a Tag>, key: &str) {
        for tag in tags {
            if let Some(keys) = self.index.get_mut(tag.as_str()) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(tag.as_str());
                }
            }
        }
    }

    /// Distinct keys carrying any of `tags`.
    pub fn keys_for<S: AsRef<str>>(&self, tags: impl IntoIterator<Item = S>) -> BTreeSet<String> {
        tags.into_iter()
            .filter_map(|tag| self.index.get(tag.as_ref()))
            .flat_map(|keys| keys.iter().cloned())
            .collect()
    }

    /// Keys currently listed under a single tag.
    pub fn keys_with(&self, tag: &str) -> Option<&HashSet<String>> {
        self.index.get(tag)
    }

    pub fn contains(&self, tag: &str, key: &str) -> bool {
        self.index.get(tag).is_some_and(|keys| keys.contains(key))
    }

    /// Number of non-empty tag groups.
    pub fn tag_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}
