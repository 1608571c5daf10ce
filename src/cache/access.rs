//! LRU access queue for cache keys

use std::collections::VecDeque;

/// Recency order of keys, least recently used at the head.
///
/// Each key appears at most once.
#[derive(Debug)]
pub struct AccessQueue<K> {
    keys: VecDeque<K>,
}

impl<K> Default for AccessQueue<K> {
    fn default() -> Self {
        Self {
            keys: VecDeque::new(),
        }
    }
}

impl<K: Clone + PartialEq> AccessQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `key` to the tail, inserting it if absent
    pub fn touch(&mut self, key: &K) {
        self.remove(key);
        self.keys.push_back(key.clone());
    }

    pub fn remove(&mut self, key: &K) {
        self.keys.retain(|k| k != key);
    }

    /// Keys from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
