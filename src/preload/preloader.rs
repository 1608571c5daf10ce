//! Speculative folder preloading
//!
//! Folders are scheduled from UI events, deduplicated by `user|folder`, and
//! drained one at a time in FIFO order with a short pause between items. A
//! background task re-drains the queue on a fixed timer until shutdown.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheEngine, CacheError};
use crate::config::PreloaderConfig;
use crate::service::FileService;

/// UI events the preloader reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadEvent {
    FolderNavigated { user_id: String, folder_id: String },
    FileUploaded { user_id: String, parent_folder_id: String },
    UserAuthenticated { user_id: String },
}

/// A queued folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadItem {
    pub user_id: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadStats {
    /// Folders actually populated by the preloader
    pub preloaded_count: usize,
    pub queued_count: usize,
    /// Every `user|folder` ever scheduled, sorted
    pub scheduled_folder_ids: Vec<String>,
}

#[derive(Default)]
struct PreloadState {
    queue: VecDeque<PreloadItem>,
    scheduled: HashSet<String>,
    preloaded: usize,
}

/// Clears the preloading flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn schedule_key(user_id: &str, folder_id: &str) -> String {
    format!("{}|{}", user_id, folder_id)
}

#[derive(Clone)]
pub struct Preloader {
    engine: CacheEngine,
    service: Arc<dyn FileService>,
    config: Arc<PreloaderConfig>,
    state: Arc<Mutex<PreloadState>>,
    /// Set while a `start_preloading` pass runs
    preloading: Arc<AtomicBool>,
    /// Held by the single active queue drainer
    drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Preloader {
    pub fn new(engine: CacheEngine, service: Arc<dyn FileService>, config: PreloaderConfig) -> Self {
        Self {
            engine,
            service,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(PreloadState::default())),
            preloading: Arc::new(AtomicBool::new(false)),
            drain_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PreloadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule the user's root folder and drain the queue.
    ///
    /// Returns false without doing anything when a pass is already running.
    pub async fn start_preloading(&self, user_id: &str) -> bool {
        if self
            .preloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(user_id = user_id, "Preload pass already running, ignoring start");
            return false;
        }
        let _pass = PassGuard(&self.preloading);

        info!(user_id = user_id, "Starting preload pass");
        let root = self.config.root_folder_id.clone();
        self.schedule_preload(user_id, &root).await;
        let processed = self.drain_queue().await;
        debug!(user_id = user_id, processed = processed, "Preload pass finished");
        true
    }

    /// Queue a folder unless it is cached or was scheduled before
    pub async fn schedule_preload(&self, user_id: &str, folder_id: &str) -> bool {
        let key = schedule_key(user_id, folder_id);
        if self.lock_state().scheduled.contains(&key) {
            trace!(key = %key, "Folder already scheduled");
            return false;
        }

        match self.engine.is_folder_cached(user_id, folder_id).await {
            Ok(true) => {
                trace!(key = %key, "Folder already cached, not scheduling");
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(user_id = user_id, folder_id = folder_id, error = %e, "Cache lookup failed, not scheduling preload");
                return false;
            }
        }

        // Re-check: another caller may have scheduled it during the lookup
        let mut state = self.lock_state();
        if !state.scheduled.insert(key) {
            return false;
        }
        state.queue.push_back(PreloadItem {
            user_id: user_id.to_string(),
            folder_id: folder_id.to_string(),
        });
        debug!(user_id = user_id, folder_id = folder_id, queued = state.queue.len(), "Scheduled folder preload");
        true
    }

    /// Preload queued folders in FIFO order. Returns how many were processed.
    ///
    /// Item failures are logged and skipped. Returns 0 immediately when
    /// another drain is active.
    pub async fn drain_queue(&self) -> usize {
        let Ok(_drain) = self.drain_lock.try_lock() else {
            trace!("Queue drain already active");
            return 0;
        };

        let mut processed = 0;
        loop {
            let next = self.lock_state().queue.pop_front();
            let Some(item) = next else {
                break;
            };

            if let Err(e) = self.preload_folder(&item.user_id, &item.folder_id).await {
                warn!(
                    user_id = %item.user_id,
                    folder_id = %item.folder_id,
                    error = %e,
                    "Folder preload failed"
                );
            }
            processed += 1;
            tokio::time::sleep(self.config.item_delay()).await;
        }
        processed
    }

    /// Seed the cache with one page of a folder that is not cached yet.
    ///
    /// Returns whether the folder was populated.
    pub async fn preload_folder(&self, user_id: &str, folder_id: &str) -> Result<bool, CacheError> {
        if self.engine.is_folder_cached(user_id, folder_id).await? {
            trace!(user_id = user_id, folder_id = folder_id, "Folder cached since scheduling");
            return Ok(false);
        }

        let ctx = self.engine.resolve(user_id, folder_id).await?;
        let listing = self
            .service
            .list_files(user_id, folder_id, ctx.current_page())
            .await?;
        let count = listing.files.len();

        self.engine
            .init_user_cache(user_id, folder_id, listing.pagination.total)
            .await?;
        self.engine
            .add_files_page(user_id, folder_id, listing.files)
            .await?;

        self.lock_state().preloaded += 1;
        info!(user_id = user_id, folder_id = folder_id, files = count, "Preloaded folder");
        Ok(true)
    }

    pub async fn handle_event(&self, event: PreloadEvent) {
        trace!(?event, "Preload event");
        match event {
            PreloadEvent::FolderNavigated { user_id, folder_id } => {
                self.schedule_preload(&user_id, &folder_id).await;
                if folder_id != self.config.root_folder_id {
                    let root = self.config.root_folder_id.clone();
                    self.schedule_preload(&user_id, &root).await;
                }
            }
            PreloadEvent::FileUploaded {
                user_id,
                parent_folder_id,
            } => {
                self.schedule_preload(&user_id, &parent_folder_id).await;
            }
            PreloadEvent::UserAuthenticated { user_id } => {
                self.start_preloading(&user_id).await;
            }
        }
    }

    pub fn stats(&self) -> PreloadStats {
        let state = self.lock_state();
        let mut scheduled_folder_ids: Vec<String> = state.scheduled.iter().cloned().collect();
        scheduled_folder_ids.sort();
        PreloadStats {
            preloaded_count: state.preloaded,
            queued_count: state.queue.len(),
            scheduled_folder_ids,
        }
    }

    /// Background task: handle events and re-drain the queue every
    /// `rearm_delay` until `shutdown` turns true or its sender goes away.
    pub async fn run(self, mut events: mpsc::Receiver<PreloadEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(rearm_ms = self.config.rearm_delay_ms, "Preloader started");
        let rearm = tokio::time::sleep(self.config.rearm_delay());
        tokio::pin!(rearm);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("Preload event channel closed");
                        break;
                    }
                },
                _ = &mut rearm => {
                    let processed = self.drain_queue().await;
                    if processed > 0 {
                        debug!(processed = processed, "Drained preload queue");
                    }
                    rearm.as_mut().reset(Instant::now() + self.config.rearm_delay());
                }
            }
        }

        info!("Preloader stopped");
    }
}
