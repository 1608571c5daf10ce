//! Remote file service capability and its HTTP client

pub mod client;
pub mod errors;
pub mod file_service;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use client::HttpFileService;
pub use errors::ServiceError;
pub use file_service::{ErrorEntry, FileService};
pub use types::*;
