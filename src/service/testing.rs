//! In-memory FileService used by unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::errors::ServiceError;
use super::file_service::FileService;
use super::types::{FileListing, FileRecord, PageInfo, Pagination};

#[derive(Default)]
struct MockFolder {
    files: Vec<FileRecord>,
    current_page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyScheme {
    /// `user:folder`
    PerFolder,
    /// `user:folder:page_N`
    PerPage,
    /// `folder_page_N`, the same for every user
    FolderOnly,
}

/// Fake file service holding folders in memory.
///
/// Cache keys are `user:folder` by default, so every page of a folder shares
/// one entry; `with_keys_per_page` and `with_folder_only_keys` switch schemes.
pub struct MockFileService {
    folders: Mutex<HashMap<(String, String), MockFolder>>,
    page_size: u32,
    latency: Duration,
    key_scheme: KeyScheme,
    /// Overrides `pagination.current` in listings
    reported_page: Option<u32>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    list_started: Mutex<Vec<Instant>>,
}

impl MockFileService {
    pub fn new(page_size: u32) -> Self {
        Self {
            folders: Mutex::new(HashMap::new()),
            page_size,
            latency: Duration::ZERO,
            key_scheme: KeyScheme::PerFolder,
            reported_page: None,
            fail_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            list_started: Mutex::new(Vec::new()),
        }
    }

    /// Delay every listing call, so concurrent callers overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_keys_per_page(mut self) -> Self {
        self.key_scheme = KeyScheme::PerPage;
        self
    }

    /// Keys that do not name the user, as some backends issue them
    pub fn with_folder_only_keys(mut self) -> Self {
        self.key_scheme = KeyScheme::FolderOnly;
        self
    }

    /// Report `page` as the listing's current page whatever was requested
    pub fn with_reported_page(mut self, page: u32) -> Self {
        self.reported_page = Some(page);
        self
    }

    pub fn add_folder(&self, user_id: &str, folder_id: &str, files: Vec<FileRecord>) {
        let mut folders = self.folders.lock().unwrap();
        folders.insert(
            (user_id.to_string(), folder_id.to_string()),
            MockFolder {
                files,
                current_page: 1,
            },
        );
    }

    pub fn set_current_page(&self, user_id: &str, folder_id: &str, page: u32) {
        let mut folders = self.folders.lock().unwrap();
        folders
            .entry((user_id.to_string(), folder_id.to_string()))
            .or_default()
            .current_page = page;
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// When each listing call started, in call order
    pub fn list_call_times(&self) -> Vec<Instant> {
        self.list_started.lock().unwrap().clone()
    }

    pub fn key_for(&self, user_id: &str, folder_id: &str, page: u32) -> String {
        match self.key_scheme {
            KeyScheme::PerFolder => format!("{}:{}", user_id, folder_id),
            KeyScheme::PerPage => format!("{}:{}:page_{}", user_id, folder_id, page),
            KeyScheme::FolderOnly => format!("{}_page_{}", folder_id, page),
        }
    }
}

/// Records named `{prefix}{n}` whose upload time is `n`
pub fn records(prefix: &str, range: std::ops::Range<usize>) -> Vec<FileRecord> {
    range
        .map(|n| {
            FileRecord::new(format!("{}{}", prefix, n), format!("{}{}.bin", prefix, n))
                .with_uploaded_at(n as i64)
        })
        .collect()
}

#[async_trait]
impl FileService for MockFileService {
    async fn list_files(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
    ) -> Result<FileListing, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_started.lock().unwrap().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ServiceError::Network("connection refused".to_string()));
        }

        let folders = self.folders.lock().unwrap();
        let folder = folders
            .get(&(user_id.to_string(), folder_id.to_string()))
            .ok_or_else(|| ServiceError::NotFound(folder_id.to_string()))?;

        let page = page.max(1);
        let size = self.page_size as usize;
        let start = (page as usize - 1) * size;
        let files: Vec<FileRecord> = folder.files.iter().skip(start).take(size).cloned().collect();

        Ok(FileListing {
            files,
            pagination: Pagination {
                current: self.reported_page.unwrap_or(page),
                total: folder.files.len() as u64,
                has_more: start + size < folder.files.len(),
                page_size: self.page_size,
            },
        })
    }

    async fn count_files(&self, user_id: &str) -> Result<u64, ServiceError> {
        let folders = self.folders.lock().unwrap();
        Ok(folders
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, folder)| folder.files.len() as u64)
            .sum())
    }

    async fn count_pages(&self, user_id: &str, folder_id: &str) -> Result<PageInfo, ServiceError> {
        let folders = self.folders.lock().unwrap();
        let (total_files, current) = folders
            .get(&(user_id.to_string(), folder_id.to_string()))
            .map(|folder| (folder.files.len() as u64, folder.current_page))
            .unwrap_or((0, 1));
        let size = u64::from(self.page_size);
        let total = ((total_files + size - 1) / size) as u32;

        Ok(PageInfo {
            current,
            total,
            has_more: u64::from(current) * size < total_files,
            page_size: self.page_size,
            total_files,
        })
    }

    async fn cache_key(
        &self,
        user_id: &str,
        folder_id: &str,
        page: u32,
    ) -> Result<String, ServiceError> {
        Ok(self.key_for(user_id, folder_id, page))
    }
}
