//! Paginated folder cache
//!
//! Entries keyed by server-resolved cache keys, an LRU access queue and
//! coalesced page fetches.

pub mod access;
pub mod engine;
pub mod entry;
pub mod errors;

pub use engine::{CacheEngine, CacheStats, EvictionListener, FolderContext, ListenerId};
pub use entry::{PageCacheEntry, PositionedFile};
pub use errors::CacheError;
