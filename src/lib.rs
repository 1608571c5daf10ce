//! Paginated folder-listing cache for a remote file service
//!
//! [`cache::CacheEngine`] keeps recently viewed folder pages in memory,
//! [`preload::Preloader`] fills it ahead of navigation, and
//! [`daemon::CacheDaemon`] wires both to the UI over [`ipc`].

pub mod cache;
pub mod config;
pub mod daemon;
pub mod ipc;
pub mod preload;
pub mod service;
