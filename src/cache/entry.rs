//! Per-key page cache entry
//!
//! Holds the files of one cached folder view in display order. Order is
//! slot-addressed: the file at absolute slot `i` belongs to page
//! `i / page_size + 1`. Slots of pages that have not been merged yet are
//! empty; trailing empty slots are compacted away after every merge and all
//! read paths skip interior ones, so readers only ever see a dense sequence.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::service::FileRecord;

/// A file annotated with its absolute position in the folder order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedFile {
    pub position: usize,
    #[serde(flatten)]
    pub file: FileRecord,
}

/// Cached state for one cache key
#[derive(Debug, Clone)]
pub struct PageCacheEntry {
    /// Owning user
    user_id: String,
    /// Folder this view belongs to
    folder_id: String,
    /// Pages whose files have been merged
    loaded_pages: BTreeSet<u32>,
    /// Records by file id
    cached_files: HashMap<String, FileRecord>,
    /// File ids by absolute slot
    file_order: Vec<Option<String>>,
    has_more: bool,
    is_fully_loaded: bool,
    total_files: u64,
    last_access_time: Instant,
    last_updated: Instant,
}

impl PageCacheEntry {
    /// Create an empty entry seeded with the server's file count
    pub fn new(user_id: &str, folder_id: &str, total_files: u64, page_size: u32) -> Self {
        let now = Instant::now();
        let has_more = total_files > u64::from(page_size);
        Self {
            user_id: user_id.to_string(),
            folder_id: folder_id.to_string(),
            loaded_pages: BTreeSet::new(),
            cached_files: HashMap::new(),
            file_order: Vec::new(),
            has_more,
            is_fully_loaded: !has_more,
            total_files,
            last_access_time: now,
            last_updated: now,
        }
    }

    /// Merge one page of files at its absolute offset.
    ///
    /// Files already cached are skipped, never overwritten. The page is
    /// recorded as loaded only after its files are in place.
    ///
    /// Returns the number of newly cached files.
    pub fn merge_page(&mut self, page: u32, files: Vec<FileRecord>, page_size: u32) -> usize {
        let page = page.max(1);
        let start = (page as usize - 1) * page_size as usize;
        let mut inserted = 0;

        for (offset, file) in files.into_iter().enumerate() {
            if self.cached_files.contains_key(&file.file_id) {
                continue;
            }
            self.place(start + offset, file.file_id.clone());
            self.cached_files.insert(file.file_id.clone(), file);
            inserted += 1;
        }

        self.compact();
        self.loaded_pages.insert(page);
        self.mark_updated();
        inserted
    }

    /// Append a single file after the last occupied slot.
    ///
    /// Returns false if the file id is already cached.
    pub fn append(&mut self, file: FileRecord) -> bool {
        if self.cached_files.contains_key(&file.file_id) {
            return false;
        }
        self.compact();
        self.file_order.push(Some(file.file_id.clone()));
        self.cached_files.insert(file.file_id.clone(), file);
        self.mark_updated();
        true
    }

    /// Put `file_id` at `position`, shifting later slots if it is taken
    fn place(&mut self, position: usize, file_id: String) {
        if position >= self.file_order.len() {
            self.file_order.resize(position, None);
            self.file_order.push(Some(file_id));
        } else if self.file_order[position].is_none() {
            self.file_order[position] = Some(file_id);
        } else {
            // Remote order shifted under us; keep both ids
            self.file_order.insert(position, Some(file_id));
        }
    }

    /// Drop trailing empty slots
    fn compact(&mut self) {
        while matches!(self.file_order.last(), Some(None)) {
            self.file_order.pop();
        }
    }

    pub fn set_has_more(&mut self, has_more: bool) {
        self.has_more = has_more;
        self.is_fully_loaded = !has_more;
    }

    /// A non-zero server total wins; otherwise keep the larger of the
    /// previous total and the number of cached files.
    pub fn reconcile_total(&mut self, server_total: u64) {
        self.total_files = if server_total > 0 {
            server_total
        } else {
            self.total_files.max(self.cached_files.len() as u64)
        };
    }

    /// Files of one page in stored order, skipping unknown ids
    pub fn page_slice(&self, page: u32, page_size: u32) -> Vec<FileRecord> {
        let start = (page.max(1) as usize - 1) * page_size as usize;
        let end = (start + page_size as usize).min(self.file_order.len());
        if start >= end {
            return Vec::new();
        }
        self.file_order[start..end]
            .iter()
            .flatten()
            .filter_map(|id| self.cached_files.get(id))
            .cloned()
            .collect()
    }

    /// Slots `start..=min(end, len - 1)`, newest first.
    ///
    /// Sorting is stable, so files with equal timestamps keep slot order.
    pub fn range(&self, start: usize, end: usize) -> Vec<PositionedFile> {
        let Some(last) = self.file_order.len().checked_sub(1) else {
            return Vec::new();
        };
        let last = end.min(last);
        if start > last {
            return Vec::new();
        }

        let mut files: Vec<PositionedFile> = (start..=last)
            .filter_map(|position| {
                self.file_order[position]
                    .as_ref()
                    .and_then(|id| self.cached_files.get(id))
                    .map(|file| PositionedFile {
                        position,
                        file: file.clone(),
                    })
            })
            .collect();
        files.sort_by(|a, b| b.file.display_timestamp().cmp(&a.file.display_timestamp()));
        files
    }

    /// Dense view of the stored order
    pub fn ordered_ids(&self) -> Vec<&str> {
        self.file_order.iter().flatten().map(String::as_str).collect()
    }

    pub fn is_page_loaded(&self, page: u32) -> bool {
        self.loaded_pages.contains(&page.max(1))
    }

    pub fn contains_file(&self, file_id: &str) -> bool {
        self.cached_files.contains_key(file_id)
    }

    pub fn touch(&mut self) {
        self.last_access_time = Instant::now();
    }

    fn mark_updated(&mut self) {
        let now = Instant::now();
        self.last_access_time = now;
        self.last_updated = now;
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    pub fn file_count(&self) -> usize {
        self.cached_files.len()
    }

    pub fn loaded_page_count(&self) -> usize {
        self.loaded_pages.len()
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.is_fully_loaded
    }

    pub fn last_access_time(&self) -> Instant {
        self.last_access_time
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }
}

#[cfg(test)]
pub(crate) fn assert_consistent(entry: &PageCacheEntry) {
    let ordered = entry.ordered_ids();
    for id in &ordered {
        assert!(entry.cached_files.contains_key(*id), "{} in order but not cached", id);
    }
    for id in entry.cached_files.keys() {
        assert!(ordered.contains(&id.as_str()), "{} cached but not ordered", id);
    }
    assert!(!matches!(entry.file_order.last(), Some(None)), "trailing placeholder");
    assert_eq!(entry.is_fully_loaded, !entry.has_more);
}
