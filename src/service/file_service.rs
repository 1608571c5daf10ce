//! The file service capability consumed by the cache

use async_trait::async_trait;

use super::errors::ServiceError;
use super::types::{FileListing, PageInfo};

/// A recent failed request, kept for diagnostics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub operation: String,
    pub path: String,
    pub error: String,
}

/// Network capability the cache and preloader are built on.
///
/// The service is authoritative for pagination: which page a folder view
/// currently maps to, and the opaque cache key for that page.
#[async_trait]
pub trait FileService: Send + Sync {
    /// List one page of a folder
    async fn list_files(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
    ) -> Result<FileListing, ServiceError>;

    /// Total number of files owned by a user
    async fn count_files(&self, user_id: &str) -> Result<u64, ServiceError>;

    /// Current page context for a folder
    async fn count_pages(&self, user_id: &str, folder_id: &str) -> Result<PageInfo, ServiceError>;

    /// Opaque cache key for a folder page
    async fn cache_key(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
    ) -> Result<String, ServiceError>;

    /// Connection health string ("healthy", "degraded", "unhealthy")
    fn health_status(&self) -> &'static str {
        "healthy"
    }

    /// Recently failed requests, oldest first
    fn recent_errors(&self) -> Vec<ErrorEntry> {
        Vec::new()
    }
}
