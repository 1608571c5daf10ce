//! Cache Engine
//!
//! Single source of truth for cached folder listings. Resolves the current
//! page context of a folder against the file service, serves loaded pages
//! from memory, and coalesces concurrent fetches of the same page into one
//! request.
//!
//! All state lives behind one mutex that is never held across an `.await`:
//! the only suspension points are file service calls, so each mutation of an
//! entry is atomic with respect to every other cache operation.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, trace, warn};

use super::access::AccessQueue;
use super::entry::{PageCacheEntry, PositionedFile};
use super::errors::CacheError;
use crate::config::CacheConfig;
use crate::service::{FileRecord, FileService, PageInfo};

type FetchResult = Result<Arc<Vec<FileRecord>>, CacheError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Callback fired with the cache key of every invalidated or evicted entry
pub type EvictionListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle returned by `add_eviction_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Map key of a cache entry.
///
/// The server's cache key need not name the user, so the owning user is
/// part of the key and two users never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    user_id: String,
    cache_key: String,
}

impl EntryKey {
    fn new(user_id: &str, cache_key: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            cache_key: cache_key.to_string(),
        }
    }
}

/// An outstanding fetch for one (entry, page)
struct PendingFetch {
    id: u64,
    fetch: SharedFetch,
    /// Callers currently awaiting `fetch`
    waiters: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<EntryKey, PageCacheEntry>,
    access_queue: AccessQueue<EntryKey>,
    pending: HashMap<(EntryKey, u32), PendingFetch>,
}

impl CacheState {
    fn has_pending(&self, key: &EntryKey) -> bool {
        self.pending.keys().any(|(pending, _)| pending == key)
    }

    /// Mark an existing entry most recently used
    fn touch(&mut self, key: &EntryKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
            self.access_queue.touch(key);
        }
    }

    fn remove(&mut self, key: &EntryKey) -> bool {
        self.access_queue.remove(key);
        self.entries.remove(key).is_some()
    }
}

/// A caller awaiting a pending fetch.
///
/// Dropping it deregisters the caller. The pending registration is cleared
/// once the fetch has completed or no caller is left waiting on it.
struct FetchWaiter<'a> {
    engine: &'a CacheEngine,
    request_key: (EntryKey, u32),
    request_id: u64,
    completed: bool,
}

impl Drop for FetchWaiter<'_> {
    fn drop(&mut self) {
        let mut state = self.engine.lock_state();
        let finished = match state.pending.get_mut(&self.request_key) {
            Some(pending) if pending.id == self.request_id => {
                pending.waiters = pending.waiters.saturating_sub(1);
                self.completed || pending.waiters == 0
            }
            _ => false,
        };
        if finished {
            state.pending.remove(&self.request_key);
            if !self.completed {
                debug!(cache_key = %self.request_key.0.cache_key, page = self.request_key.1, "Fetch abandoned by all callers");
            }
        }
    }
}

/// A folder view resolved against the file service
#[derive(Debug, Clone, PartialEq)]
pub struct FolderContext {
    pub cache_key: String,
    pub page_info: PageInfo,
}

impl FolderContext {
    /// Page the server says the folder is on, never below 1
    pub fn current_page(&self) -> u32 {
        self.page_info.current.max(1)
    }

    /// Highest page a caller may request: one past the last known page
    pub fn page_limit(&self) -> u32 {
        self.page_info
            .total
            .max(self.page_info.current)
            .max(1)
            .saturating_add(1)
    }

    fn entry_key(&self, user_id: &str) -> EntryKey {
        EntryKey::new(user_id, &self.cache_key)
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub cached_files: usize,
    pub loaded_pages: usize,
    pub pending_requests: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Paginated folder cache shared by the UI surface and the preloader
#[derive(Clone)]
pub struct CacheEngine {
    /// Remote capability used for listings and key resolution
    service: Arc<dyn FileService>,
    config: Arc<CacheConfig>,
    /// Entries, access queue and in-flight fetches
    state: Arc<Mutex<CacheState>>,
    listeners: Arc<RwLock<Vec<(ListenerId, EvictionListener)>>>,
    /// Source of listener and request ids
    next_id: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl CacheEngine {
    /// Create an engine over `service`, rejecting invalid configuration
    pub fn new(service: Arc<dyn FileService>, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        info!(
            page_size = config.page_size,
            max_pages = config.max_pages,
            eviction_limit = config.eviction_limit(),
            "Cache engine initialized"
        );
        Ok(Self {
            service,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CacheState::default())),
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the service which page the folder is on and which key that maps to
    pub async fn resolve(&self, user_id: &str, folder_id: &str) -> Result<FolderContext, CacheError> {
        let page_info = self.service.count_pages(user_id, folder_id).await?;
        let cache_key = self
            .service
            .cache_key(user_id, folder_id, page_info.current.max(1))
            .await?;
        trace!(user_id = user_id, folder_id = folder_id, cache_key = %cache_key, "Resolved cache key");
        Ok(FolderContext {
            cache_key,
            page_info,
        })
    }

    /// Create the entry for a folder if it does not exist yet.
    ///
    /// An existing entry keeps its data and only becomes most recently used.
    pub async fn init_user_cache(
        &self,
        user_id: &str,
        folder_id: &str,
        total_files_count: u64,
    ) -> Result<(), CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        let key = ctx.entry_key(user_id);
        let page_size = self.config.page_size;

        let evicted = {
            let mut state = self.lock_state();
            if !state.entries.contains_key(&key) {
                state.entries.insert(
                    key.clone(),
                    PageCacheEntry::new(user_id, folder_id, total_files_count, page_size),
                );
                debug!(cache_key = %ctx.cache_key, total = total_files_count, "Created cache entry");
            }
            state.touch(&key);
            self.enforce_capacity(&mut state, &key)
        };

        self.notify_evicted(&evicted);
        Ok(())
    }

    /// Get one page of a folder, from memory when that page is loaded.
    ///
    /// Concurrent calls for the same (cache key, page) share a single fetch
    /// and all receive its outcome. Pages past `FolderContext::page_limit`
    /// are rejected before anything is fetched.
    pub async fn get_files(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
        force_refresh: bool,
    ) -> Result<Vec<FileRecord>, CacheError> {
        let page = page.max(1);
        let ctx = self.resolve(user_id, folder_id).await?;
        let limit = ctx.page_limit();
        if page > limit {
            warn!(user_id = user_id, folder_id = folder_id, page = page, limit = limit, "Rejecting page past end of folder");
            return Err(CacheError::PageOutOfRange { page, limit });
        }

        let key = ctx.entry_key(user_id);
        let request_key = (key.clone(), page);

        let (request_id, fetch) = {
            let mut state = self.lock_state();

            if !force_refresh {
                let cached = state
                    .entries
                    .get(&key)
                    .filter(|entry| entry.is_page_loaded(page))
                    .map(|entry| entry.page_slice(page, self.config.page_size));
                if let Some(files) = cached {
                    state.touch(&key);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(cache_key = %ctx.cache_key, page = page, "Cache HIT for folder page");
                    return Ok(files);
                }
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            match state.pending.get_mut(&request_key) {
                Some(pending) => {
                    debug!(cache_key = %ctx.cache_key, page = page, "Joining in-flight fetch");
                    pending.waiters += 1;
                    (pending.id, pending.fetch.clone())
                }
                None => {
                    debug!(cache_key = %ctx.cache_key, page = page, "Cache MISS, fetching page");
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.fetch_page(key, folder_id, page, limit);
                    state.pending.insert(
                        request_key.clone(),
                        PendingFetch {
                            id,
                            fetch: fetch.clone(),
                            waiters: 1,
                        },
                    );
                    (id, fetch)
                }
            }
        };

        let mut waiter = FetchWaiter {
            engine: self,
            request_key,
            request_id,
            completed: false,
        };
        let result = fetch.await;
        waiter.completed = true;
        drop(waiter);

        result.map(|files| files.as_ref().clone())
    }

    /// Build the shared future that lists a page and merges it
    fn fetch_page(&self, key: EntryKey, folder_id: &str, page: u32, page_limit: u32) -> SharedFetch {
        let engine = self.clone();
        let folder_id = folder_id.to_string();

        async move {
            let listing = engine
                .service
                .list_files(&key.user_id, &folder_id, page)
                .await
                .map_err(|e| {
                    warn!(
                        user_id = %key.user_id,
                        folder_id = %folder_id,
                        page = page,
                        transient = e.is_transient(),
                        error = %e,
                        "Failed to fetch folder page"
                    );
                    CacheError::from(e)
                })?;

            // The listing says which page it is; trust it within the folder's bounds
            let listed_page = match listing.pagination.current {
                current if (1..=page_limit).contains(&current) => current,
                _ => page,
            };
            let files = listing.files.clone();
            engine.merge_files(
                &key,
                &folder_id,
                listed_page,
                listing.files,
                listing.pagination.has_more,
                listing.pagination.total,
            );
            Ok(Arc::new(files))
        }
        .boxed()
        .shared()
    }

    /// Merge a batch into the folder's current server-reported page
    pub async fn add_files_page(
        &self,
        user_id: &str,
        folder_id: &str,
        files: Vec<FileRecord>,
    ) -> Result<(), CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        self.merge_files(
            &ctx.entry_key(user_id),
            folder_id,
            ctx.current_page(),
            files,
            ctx.page_info.has_more,
            ctx.page_info.total_files,
        );
        Ok(())
    }

    fn merge_files(
        &self,
        key: &EntryKey,
        folder_id: &str,
        page: u32,
        files: Vec<FileRecord>,
        has_more: bool,
        server_total: u64,
    ) {
        let page_size = self.config.page_size;

        let evicted = {
            let mut state = self.lock_state();
            let entry = state.entries.entry(key.clone()).or_insert_with(|| {
                PageCacheEntry::new(&key.user_id, folder_id, server_total, page_size)
            });

            let inserted = entry.merge_page(page, files, page_size);
            entry.set_has_more(has_more);
            entry.reconcile_total(server_total);
            debug!(
                cache_key = %key.cache_key,
                page = page,
                inserted = inserted,
                cached = entry.file_count(),
                has_more = has_more,
                "Merged page into cache"
            );

            state.access_queue.touch(key);
            self.enforce_capacity(&mut state, key)
        };

        self.notify_evicted(&evicted);
    }

    /// Insert a just-uploaded file, creating the folder entry if needed
    pub async fn add_file(
        &self,
        user_id: &str,
        folder_id: &str,
        file: FileRecord,
    ) -> Result<(), CacheError> {
        let user_total = self.service.count_files(user_id).await?;
        let ctx = self.resolve(user_id, folder_id).await?;
        let key = ctx.entry_key(user_id);
        let page_size = self.config.page_size;
        let folder_total = ctx.page_info.total_files;

        let evicted = {
            let mut state = self.lock_state();
            let seed = if folder_total > 0 { folder_total } else { user_total };
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| PageCacheEntry::new(user_id, folder_id, seed, page_size));

            let file_id = file.file_id.clone();
            if entry.append(file) {
                entry.reconcile_total(folder_total);
                debug!(cache_key = %ctx.cache_key, file_id = %file_id, "Cached uploaded file");
            } else {
                trace!(cache_key = %ctx.cache_key, file_id = %file_id, "Uploaded file already cached");
            }

            state.touch(&key);
            self.enforce_capacity(&mut state, &key)
        };

        self.notify_evicted(&evicted);
        Ok(())
    }

    /// Drop the entry for the folder's current view.
    ///
    /// Returns whether an entry was removed; listeners fire only in that case.
    pub async fn invalidate_folder_cache(
        &self,
        user_id: &str,
        folder_id: &str,
    ) -> Result<bool, CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        let removed = self.lock_state().remove(&ctx.entry_key(user_id));

        if removed {
            info!(user_id = user_id, folder_id = folder_id, cache_key = %ctx.cache_key, "Invalidated folder cache");
            self.notify_evicted(&[ctx.cache_key]);
        }
        Ok(removed)
    }

    /// Drop every entry owned by `user_id`, returning the removed cache keys
    pub fn invalidate_user_cache(&self, user_id: &str) -> Vec<String> {
        let removed: Vec<String> = {
            let mut state = self.lock_state();
            let keys: Vec<EntryKey> = state
                .entries
                .keys()
                .filter(|key| key.user_id == user_id)
                .cloned()
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys.into_iter().map(|key| key.cache_key).collect()
        };

        info!(user_id = user_id, count = removed.len(), "Invalidated user cache");
        self.notify_evicted(&removed);
        removed
    }

    pub async fn is_folder_cached(&self, user_id: &str, folder_id: &str) -> Result<bool, CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        Ok(self.lock_state().entries.contains_key(&ctx.entry_key(user_id)))
    }

    /// Cached total for the folder, 0 when not cached
    pub async fn get_total_files(&self, user_id: &str, folder_id: &str) -> Result<u64, CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        Ok(self
            .lock_state()
            .entries
            .get(&ctx.entry_key(user_id))
            .map(PageCacheEntry::total_files)
            .unwrap_or(0))
    }

    /// Whether more files exist beyond the cached pages; true when not cached
    pub async fn has_more_files(&self, user_id: &str, folder_id: &str) -> Result<bool, CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        Ok(self
            .lock_state()
            .entries
            .get(&ctx.entry_key(user_id))
            .map(PageCacheEntry::has_more)
            .unwrap_or(true))
    }

    /// Cached files at positions `start..=end`, newest first
    pub async fn get_files_in_range(
        &self,
        user_id: &str,
        folder_id: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<PositionedFile>, CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        let key = ctx.entry_key(user_id);
        let mut state = self.lock_state();
        let files = state
            .entries
            .get(&key)
            .map(|entry| entry.range(start, end))
            .unwrap_or_default();
        state.touch(&key);
        Ok(files)
    }

    /// Synchronous read of a page `user_id` holds under `cache_key`
    pub fn cached_page(&self, user_id: &str, cache_key: &str, page: u32) -> Vec<FileRecord> {
        let key = EntryKey::new(user_id, cache_key);
        let mut state = self.lock_state();
        let files = state
            .entries
            .get(&key)
            .map(|entry| entry.page_slice(page, self.config.page_size))
            .unwrap_or_default();
        state.touch(&key);
        files
    }

    /// Folder ids with at least one cached entry for `user_id`
    pub fn cached_folders(&self, user_id: &str) -> Vec<String> {
        let state = self.lock_state();
        let mut folders: Vec<String> = state
            .entries
            .values()
            .filter(|entry| entry.user_id() == user_id)
            .map(|entry| entry.folder_id().to_string())
            .collect();
        folders.sort();
        folders.dedup();
        folders
    }

    /// Fetch the folder's current page, then the first missing page among
    /// the next `preload_pages` while the server reports more.
    pub async fn preload_folder_data(&self, user_id: &str, folder_id: &str) -> Result<(), CacheError> {
        let ctx = self.resolve(user_id, folder_id).await?;
        self.get_files(user_id, folder_id, ctx.current_page(), false)
            .await?;

        let missing = {
            let state = self.lock_state();
            state
                .entries
                .get(&ctx.entry_key(user_id))
                .filter(|entry| entry.has_more())
                .and_then(|entry| (2..=self.config.preload_pages).find(|p| !entry.is_page_loaded(*p)))
        };

        if let Some(page) = missing {
            debug!(folder_id = folder_id, page = page, "Preloading next page");
            self.get_files(user_id, folder_id, page, false).await?;
        }
        Ok(())
    }

    /// Drop all entries and forget in-flight fetches without notifying listeners
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.access_queue.clear();
        state.pending.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        info!("Cache cleared");
    }

    pub fn add_eviction_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn remove_eviction_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Evict from the LRU head while over the limit, skipping keys with a
    /// fetch in flight and `written`, the entry the current call just wrote.
    /// Returns the evicted cache keys; the caller notifies.
    fn enforce_capacity(&self, state: &mut CacheState, written: &EntryKey) -> Vec<String> {
        let limit = self.config.eviction_limit();
        if state.entries.len() <= limit {
            return Vec::new();
        }

        let candidates: Vec<EntryKey> = state.access_queue.iter().cloned().collect();
        let mut evicted = Vec::new();
        for key in candidates {
            if state.entries.len() <= limit {
                break;
            }
            if key == *written {
                continue;
            }
            if state.has_pending(&key) {
                trace!(cache_key = %key.cache_key, "Skipping eviction of key with fetch in flight");
                continue;
            }
            if state.remove(&key) {
                evicted.push(key.cache_key);
            }
        }

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                entries = state.entries.len(),
                limit = limit,
                "Evicted least recently used cache entries"
            );
        }
        if state.entries.len() > limit {
            debug!(entries = state.entries.len(), limit = limit, "Cache over limit, remaining entries are busy");
        }
        evicted
    }

    /// Call every listener for every key, outside the state lock
    fn notify_evicted(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let listeners: Vec<EvictionListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for key in keys {
            for listener in &listeners {
                listener(key);
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: state.entries.len(),
            cached_files: state.entries.values().map(PageCacheEntry::file_count).sum(),
            loaded_pages: state.entries.values().map(PageCacheEntry::loaded_page_count).sum(),
            pending_requests: state.pending.len(),
            hits,
            misses,
            hit_rate,
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate),
            entries = stats.entries,
            cached_files = stats.cached_files,
            pending = stats.pending_requests,
            "Cache metrics"
        );
    }
}
