//! HTTP File Service Client
//!
//! Provides access to the remote listing API used by the cache: folder pages,
//! file counts, page context and cache keys.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::ServiceError;
use super::file_service::{ErrorEntry, FileService};
use super::types::{CacheKeyResponse, CountResponse, FileListing, ListFilesResponse, PageInfo};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:3001/main";

/// HTTP client timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// Client for the remote file service
#[derive(Clone)]
pub struct HttpFileService {
    /// HTTP client for making requests
    http_client: Client,
    /// API base URL without trailing slash
    base_url: String,
    /// Page size requested from the listing endpoint
    page_size: u32,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

impl HttpFileService {
    /// Create a client for the service at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `http://localhost:3001/main`
    /// * `page_size` - Files per listing page
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, page_size: u32, timeout: Duration) -> Result<Self, ServiceError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a GET and decode the JSON body, tracking health on the way
    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(operation = operation, url = %url, query = ?query, "File service request");

        let response = match self.http_client.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(e) => return Err(self.record_failure(operation, path, ServiceError::from(e))),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(self.record_failure(operation, path, ServiceError::from_status(status, &body)));
        }

        match response.json::<T>().await {
            Ok(value) => {
                self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => Err(self.record_failure(
                operation,
                path,
                ServiceError::Decode(e.to_string()),
            )),
        }
    }

    /// Update health and the error ring buffer for a failed request
    fn record_failure(&self, operation: &str, path: &str, error: ServiceError) -> ServiceError {
        match &error {
            ServiceError::Network(_) | ServiceError::Timeout => {
                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed)
            }
            ServiceError::RateLimited | ServiceError::Server(_, _) => {
                self.health.store(HEALTH_DEGRADED, Ordering::Relaxed)
            }
            _ => {}
        }
        warn!(operation = operation, path = path, error = %error, "File service request failed");

        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            path: path.to_string(),
            error: error.to_string(),
        };

        let mut log = self.error_log.write().unwrap_or_else(PoisonError::into_inner);
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);

        error
    }
}

#[async_trait]
impl FileService for HttpFileService {
    async fn list_files(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
    ) -> Result<FileListing, ServiceError> {
        let response: ListFilesResponse = self
            .get_json(
                "list_files",
                "/api/files/list",
                &[
                    ("userId", user_id.to_string()),
                    ("parentFolderId", folder_id.to_string()),
                    ("page", page.to_string()),
                    ("pageSize", self.page_size.to_string()),
                ],
            )
            .await?;

        let listing = response.into_listing(page);
        debug!(
            user_id = user_id,
            folder_id = folder_id,
            page = page,
            count = listing.files.len(),
            "Listed files"
        );
        Ok(listing)
    }

    async fn count_files(&self, user_id: &str) -> Result<u64, ServiceError> {
        let response: CountResponse = self
            .get_json("count_files", "/api/files/count", &[("userId", user_id.to_string())])
            .await?;
        Ok(response.value())
    }

    async fn count_pages(&self, user_id: &str, folder_id: &str) -> Result<PageInfo, ServiceError> {
        self.get_json(
            "count_pages",
            "/api/files/pages",
            &[
                ("userId", user_id.to_string()),
                ("parentFolderId", folder_id.to_string()),
                ("pageSize", self.page_size.to_string()),
            ],
        )
        .await
    }

    async fn cache_key(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
    ) -> Result<String, ServiceError> {
        let response: CacheKeyResponse = self
            .get_json(
                "cache_key",
                "/api/files/cache-key",
                &[
                    ("userId", user_id.to_string()),
                    ("parentFolderId", folder_id.to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;
        Ok(response.into_key())
    }

    fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.error_log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
