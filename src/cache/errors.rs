//! Cache error types

use crate::service::ServiceError;

/// Errors surfaced by cache operations
///
/// `Clone` so a single failed fetch can be returned to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// Invalid or missing wiring, fatal to the triggering call
    #[error("Cache configuration error: {0}")]
    Config(String),

    /// Listing, count or pagination lookup failed
    #[error("File service error: {0}")]
    Service(#[from] ServiceError),

    /// Requested page lies past the end of the folder
    #[error("Page {page} is beyond the folder's last page (limit {limit})")]
    PageOutOfRange { page: u32, limit: u32 },
}
