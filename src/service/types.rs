//! File service types and wire normalization
//!
//! Defines the normalized file record used by the cache and the wire shapes
//! returned by the listing API. Records are normalized here, at the service
//! boundary, so the cache only ever sees records with a mandatory identifier.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Deserialize a number that might be encoded as a string or null.
/// The listing API returns counts and sizes as numbers, numeric strings,
/// or null depending on which backend database produced the row.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.trim().parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Deserialize a timestamp into milliseconds since the Unix epoch.
///
/// Accepts integer milliseconds, numeric strings, RFC 3339 strings and the
/// SQL `YYYY-MM-DD HH:MM:SS[.fff]` form (interpreted as UTC). Null maps to None.
fn deserialize_flexible_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleMillisVisitor;

    impl<'de> de::Visitor<'de> for FlexibleMillisVisitor {
        type Value = Option<i64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("epoch milliseconds, a timestamp string, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Option<i64>, E> {
            i64::try_from(value)
                .map(Some)
                .map_err(|_| de::Error::custom("timestamp out of range"))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Option<i64>, E> {
            Ok(Some(value))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Option<i64>, E> {
            Ok(Some(value as i64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<i64>, E> {
            if value.trim().is_empty() {
                return Ok(None);
            }
            parse_timestamp_millis(value)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("unrecognized timestamp: {}", value)))
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<i64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<i64>, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, deserializer: D2) -> Result<Option<i64>, D2::Error> {
            deserializer.deserialize_any(FlexibleMillisVisitor)
        }
    }

    deserializer.deserialize_any(FlexibleMillisVisitor)
}

/// Parse a textual timestamp into epoch milliseconds
pub fn parse_timestamp_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<i64>() {
        return Some(millis);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// A file record as the cache stores and returns it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Remote identifier, never empty
    pub file_id: String,
    /// Original file name
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
    pub parent_folder_id: Option<String>,
    /// Upload time in milliseconds since epoch
    pub uploaded_at: Option<i64>,
    /// Last modification time in milliseconds since epoch
    pub last_modified: Option<i64>,
}

impl FileRecord {
    pub fn new(file_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: file_name.into(),
            file_size: 0,
            mime_type: None,
            file_type: None,
            parent_folder_id: None,
            uploaded_at: None,
            last_modified: None,
        }
    }

    pub fn with_uploaded_at(mut self, millis: i64) -> Self {
        self.uploaded_at = Some(millis);
        self
    }

    pub fn with_parent(mut self, folder_id: impl Into<String>) -> Self {
        self.parent_folder_id = Some(folder_id.into());
        self
    }

    /// Timestamp used for display ordering: upload time, else modification time
    pub fn display_timestamp(&self) -> i64 {
        self.uploaded_at.or(self.last_modified).unwrap_or(0)
    }
}

/// A file record exactly as the listing API sends it
#[derive(Debug, Clone, Deserialize)]
pub struct RawFileRecord {
    #[serde(default, alias = "fileId")]
    pub file_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(
        default,
        alias = "original_filename",
        alias = "originalFilename",
        alias = "fileName"
    )]
    pub name: Option<String>,
    #[serde(default, alias = "fileSize", alias = "size", deserialize_with = "deserialize_flexible_u64")]
    pub file_size: u64,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default, alias = "fileType")]
    pub file_type: Option<String>,
    #[serde(default, alias = "parentFolderId")]
    pub parent_folder_id: Option<String>,
    #[serde(default, alias = "uploadedAt", deserialize_with = "deserialize_flexible_millis")]
    pub uploaded_at: Option<i64>,
    #[serde(default, alias = "lastModified", deserialize_with = "deserialize_flexible_millis")]
    pub last_modified: Option<i64>,
}

impl RawFileRecord {
    /// Normalize into a FileRecord. Returns None when the record has no identifier.
    pub fn normalize(self) -> Option<FileRecord> {
        let file_id = self
            .file_id
            .filter(|id| !id.trim().is_empty())
            .or(self.id.filter(|id| !id.trim().is_empty()))?;

        Some(FileRecord {
            file_name: self.name.unwrap_or_else(|| file_id.clone()),
            file_id,
            file_size: self.file_size,
            mime_type: self.mime_type,
            file_type: self.file_type,
            parent_folder_id: self.parent_folder_id,
            uploaded_at: self.uploaded_at,
            last_modified: self.last_modified,
        })
    }
}

/// Normalize a batch of wire records, dropping those without an identifier
pub fn normalize_records(raw: Vec<RawFileRecord>) -> Vec<FileRecord> {
    let total = raw.len();
    let files: Vec<FileRecord> = raw.into_iter().filter_map(RawFileRecord::normalize).collect();
    if files.len() < total {
        warn!(
            dropped = total - files.len(),
            "Dropped file records without an identifier"
        );
    }
    files
}

/// Pagination metadata attached to a listing response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page this listing represents (0 when the server did not say)
    #[serde(default, alias = "page")]
    pub current: u32,
    /// Total files in the folder
    #[serde(default, alias = "totalFiles", deserialize_with = "deserialize_flexible_u64")]
    pub total: u64,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_size: u32,
}

/// Current page context of a folder as reported by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Page the user is currently viewing (1-based, 0 if unknown)
    #[serde(default, alias = "page")]
    pub current: u32,
    /// Total number of pages
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub total_files: u64,
}

/// One page of files with its pagination metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileListing {
    pub files: Vec<FileRecord>,
    pub pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFilesBody {
    #[serde(default)]
    pub files: Vec<RawFileRecord>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Response from the list endpoint; some deployments wrap the body in `data`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListFilesResponse {
    Wrapped { data: ListFilesBody },
    Bare(ListFilesBody),
}

impl ListFilesResponse {
    /// Normalize into a listing for the page that was requested
    pub fn into_listing(self, requested_page: u32) -> FileListing {
        let body = match self {
            ListFilesResponse::Wrapped { data } => data,
            ListFilesResponse::Bare(body) => body,
        };
        let pagination = body.pagination.unwrap_or(Pagination {
            current: requested_page,
            ..Pagination::default()
        });
        FileListing {
            files: normalize_records(body.files),
            pagination,
        }
    }
}

/// Response from the count endpoint: a bare number or an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CountResponse {
    Plain(u64),
    Object {
        #[serde(alias = "count", alias = "totalFiles")]
        total: u64,
    },
}

impl CountResponse {
    pub fn value(&self) -> u64 {
        match self {
            CountResponse::Plain(value) => *value,
            CountResponse::Object { total } => *total,
        }
    }
}

/// Response from the cache-key endpoint: a bare string or an object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CacheKeyResponse {
    Plain(String),
    Object {
        #[serde(alias = "cacheKey", alias = "key")]
        cache_key: String,
    },
}

impl CacheKeyResponse {
    pub fn into_key(self) -> String {
        match self {
            CacheKeyResponse::Plain(key) => key,
            CacheKeyResponse::Object { cache_key } => cache_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_server_listing() {
        // Listing as produced by the folder listing endpoint
        let json = r#"{
            "files": [
                {
                    "file_id": "f-1",
                    "original_filename": "report.pdf",
                    "file_size": 2048,
                    "mime_type": "application/pdf",
                    "file_type": "document",
                    "parent_folder_id": "root",
                    "uploaded_at": "2024-03-01 10:15:00",
                    "last_modified": "2024-03-02T08:00:00Z"
                }
            ],
            "pagination": {"page": 2, "pageSize": 20, "total": 41, "hasMore": true, "fromCache": false}
        }"#;
        let listing = serde_json::from_str::<ListFilesResponse>(json)
            .unwrap()
            .into_listing(2);

        assert_eq!(listing.files.len(), 1);
        let file = &listing.files[0];
        assert_eq!(file.file_id, "f-1");
        assert_eq!(file.file_name, "report.pdf");
        assert_eq!(file.file_size, 2048);
        assert_eq!(file.uploaded_at, Some(1_709_288_100_000));
        assert_eq!(file.last_modified, Some(1_709_366_400_000));
        assert_eq!(listing.pagination.current, 2);
        assert_eq!(listing.pagination.total, 41);
        assert!(listing.pagination.has_more);
    }

    #[test]
    fn test_wrapped_listing_and_id_fallback() {
        let json = r#"{
            "data": {
                "files": [
                    {"id": "legacy-7", "name": "notes.txt", "size": "12", "uploadedAt": 1000},
                    {"fileName": "orphan.txt"}
                ],
                "pagination": {"current": 1, "total": 2, "hasMore": false}
            }
        }"#;
        let listing = serde_json::from_str::<ListFilesResponse>(json)
            .unwrap()
            .into_listing(1);

        // Record without any identifier is dropped at the boundary
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].file_id, "legacy-7");
        assert_eq!(listing.files[0].file_size, 12);
        assert_eq!(listing.files[0].uploaded_at, Some(1000));
    }

    #[test]
    fn test_missing_pagination_defaults_to_requested_page() {
        let json = r#"{"files": []}"#;
        let listing = serde_json::from_str::<ListFilesResponse>(json)
            .unwrap()
            .into_listing(3);
        assert!(listing.files.is_empty());
        assert_eq!(listing.pagination.current, 3);
        assert!(!listing.pagination.has_more);
    }

    #[test]
    fn test_timestamp_formats() {
        assert_eq!(parse_timestamp_millis("1536964279000"), Some(1_536_964_279_000));
        assert_eq!(
            parse_timestamp_millis("2018-09-14T22:31:19Z"),
            Some(1_536_964_279_000)
        );
        assert_eq!(
            parse_timestamp_millis("2018-09-14 22:31:19.500"),
            Some(1_536_964_279_500)
        );
        assert_eq!(parse_timestamp_millis("yesterday"), None);
    }

    #[test]
    fn test_null_timestamps() {
        let json = r#"{"file_id": "a", "uploaded_at": null, "last_modified": 5}"#;
        let record: RawFileRecord = serde_json::from_str(json).unwrap();
        let file = record.normalize().unwrap();
        assert_eq!(file.uploaded_at, None);
        assert_eq!(file.display_timestamp(), 5);
    }

    #[test]
    fn test_count_and_key_responses() {
        let plain: CountResponse = serde_json::from_str("17").unwrap();
        assert_eq!(plain.value(), 17);
        let object: CountResponse = serde_json::from_str(r#"{"count": 4}"#).unwrap();
        assert_eq!(object.value(), 4);

        let key: CacheKeyResponse = serde_json::from_str(r#"{"cacheKey": "root_page_1"}"#).unwrap();
        assert_eq!(key.into_key(), "root_page_1");
        let key: CacheKeyResponse = serde_json::from_str(r#""docs_page_2""#).unwrap();
        assert_eq!(key.into_key(), "docs_page_2");
    }

    #[test]
    fn test_page_info() {
        let json = r#"{"current": 2, "total": 3, "hasMore": true, "pageSize": 20, "totalFiles": "45"}"#;
        let info: PageInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.current, 2);
        assert_eq!(info.total, 3);
        assert_eq!(info.total_files, 45);
        assert!(info.has_more);
    }
}
