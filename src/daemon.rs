//! Cache Daemon - owns the cache, the preloader and their background task
//!
//! Built once at startup and shared by every IPC connection. Shutdown stops
//! the preloader task and waits for it with a timeout.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEngine, CacheStats, ListenerId};
use crate::config::DaemonConfig;
use crate::preload::{PreloadEvent, PreloadStats, Preloader};
use crate::service::{ErrorEntry, FileService, HttpFileService};

/// Queued UI events before senders wait
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Evictions buffered per subscriber before it starts lagging
const EVICTION_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for the preloader task
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of the daemon
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub service_health: &'static str,
    pub uptime: Duration,
    pub cache: CacheStats,
    pub preload: PreloadStats,
    pub recent_errors: Vec<ErrorEntry>,
}

pub struct CacheDaemon {
    engine: CacheEngine,
    preloader: Preloader,
    service: Arc<dyn FileService>,
    /// Feeds the preloader task
    events: mpsc::Sender<PreloadEvent>,
    /// Fan-out of evicted cache keys to subscribed connections
    evictions: broadcast::Sender<String>,
    eviction_listener: ListenerId,
    shutdown: watch::Sender<bool>,
    preload_task: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl CacheDaemon {
    /// Build the daemon against the HTTP file service named in `config`
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        let service = HttpFileService::new(
            &config.service_url,
            config.cache.page_size,
            config.request_timeout(),
        )
        .context("Failed to create file service client")?;
        info!(service_url = %service.base_url(), "File service client ready");

        Self::with_service(Arc::new(service), config)
    }

    /// Build the daemon over any file service and start the preloader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_service(service: Arc<dyn FileService>, config: &DaemonConfig) -> Result<Self> {
        let engine = CacheEngine::new(Arc::clone(&service), config.cache.clone())
            .context("Invalid cache configuration")?;
        let preloader = Preloader::new(engine.clone(), Arc::clone(&service), config.preloader.clone());

        let (evictions, _) = broadcast::channel(EVICTION_CHANNEL_CAPACITY);
        let sender = evictions.clone();
        let eviction_listener = engine.add_eviction_listener(move |key| {
            debug!(cache_key = key, "Cache entry evicted");
            // Nobody subscribed is not an error
            let _ = sender.send(key.to_string());
        });

        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(preloader.clone().run(event_rx, shutdown_rx));

        Ok(Self {
            engine,
            preloader,
            service,
            events,
            evictions,
            eviction_listener,
            shutdown,
            preload_task: Mutex::new(Some(task)),
            started_at: Instant::now(),
        })
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    pub fn preloader(&self) -> &Preloader {
        &self.preloader
    }

    /// Hand a UI event to the preloader task
    pub async fn send_event(&self, event: PreloadEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .context("Preloader is not running")
    }

    pub fn subscribe_evictions(&self) -> broadcast::Receiver<String> {
        self.evictions.subscribe()
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            service_health: self.service.health_status(),
            uptime: self.started_at.elapsed(),
            cache: self.engine.stats(),
            preload: self.preloader.stats(),
            recent_errors: self.service.recent_errors(),
        }
    }

    /// Stop the preloader and wait for it to finish
    pub async fn shutdown(&self) {
        let task = self
            .preload_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            debug!("Daemon already shut down");
            return;
        };

        info!("Stopping preloader...");
        self.engine.log_metrics();
        // Receivers may already be gone if the task ended on its own
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => info!("Preloader stopped"),
            Ok(Err(e)) => warn!(error = %e, "Preloader task panicked"),
            Err(_) => warn!("Preloader shutdown timed out, task may still be running"),
        }

        self.engine.remove_eviction_listener(self.eviction_listener);
    }
}
