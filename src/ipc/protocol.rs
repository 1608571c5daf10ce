//! IPC protocol definitions for UI-daemon communication
//!
//! Newline-delimited JSON over a Unix domain socket. Every message carries a
//! camelCase `type` tag; field names are camelCase too.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, PositionedFile};
use crate::preload::PreloadStats;
use crate::service::{ErrorEntry, FileRecord, RawFileRecord};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

fn first_page() -> u32 {
    1
}

/// Commands sent from the UI to the daemon
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Read one page of a folder
    #[serde(rename_all = "camelCase")]
    GetFiles {
        user_id: String,
        folder_id: String,
        #[serde(default = "first_page")]
        page: u32,
        #[serde(default)]
        force_refresh: bool,
    },
    /// Cached files at positions `start..=end`, newest first
    #[serde(rename_all = "camelCase")]
    GetFilesInRange {
        user_id: String,
        folder_id: String,
        start: usize,
        end: usize,
    },
    #[serde(rename_all = "camelCase")]
    IsFolderCached { user_id: String, folder_id: String },
    #[serde(rename_all = "camelCase")]
    GetTotalFiles { user_id: String, folder_id: String },
    #[serde(rename_all = "camelCase")]
    HasMoreFiles { user_id: String, folder_id: String },
    #[serde(rename_all = "camelCase")]
    InvalidateFolder { user_id: String, folder_id: String },
    #[serde(rename_all = "camelCase")]
    InvalidateUser { user_id: String },
    /// Fetch the current page and the pages right after it
    #[serde(rename_all = "camelCase")]
    PrefetchFolder { user_id: String, folder_id: String },
    #[serde(rename_all = "camelCase")]
    FolderNavigated { user_id: String, folder_id: String },
    /// A file was uploaded; `file` is inserted into the cache when present
    #[serde(rename_all = "camelCase")]
    FileUploaded {
        user_id: String,
        parent_folder_id: String,
        #[serde(default)]
        file: Option<RawFileRecord>,
    },
    #[serde(rename_all = "camelCase")]
    UserAuthenticated { user_id: String },
    /// Turn this connection into a stream of `evicted` messages
    SubscribeEvictions,
    GetStatus,
}

/// Responses sent from the daemon to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Success { message: Option<String> },
    #[serde(rename_all = "camelCase")]
    Error { error: String },
    #[serde(rename_all = "camelCase")]
    Files { page: u32, files: Vec<FileRecord> },
    #[serde(rename_all = "camelCase")]
    RangedFiles { files: Vec<PositionedFile> },
    #[serde(rename_all = "camelCase")]
    Flag { value: bool },
    #[serde(rename_all = "camelCase")]
    Count { value: u64 },
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        healthy: bool,
        service_health: String,
        uptime_secs: u64,
        cache: CacheStats,
        preload: PreloadStats,
        recent_errors: Vec<ErrorEntry>,
    },
    /// Pushed to eviction subscribers
    #[serde(rename_all = "camelCase")]
    Evicted { cache_key: String },
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Response::Success {
            message: Some(message.into()),
        }
    }

    pub fn error(error: impl std::fmt::Display) -> Self {
        Response::Error {
            error: error.to_string(),
        }
    }
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn to_value(response: &Response) -> Value {
        let bytes = serialize_response(response).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_get_files_defaults() {
        let json = r#"{"type":"getFiles","userId":"u1","folderId":"root"}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::GetFiles {
                user_id,
                folder_id,
                page,
                force_refresh,
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(folder_id, "root");
                assert_eq!(page, 1);
                assert!(!force_refresh);
            }
            other => panic!("Expected GetFiles command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_range_command() {
        let json = r#"{"type":"getFilesInRange","userId":"u1","folderId":"docs","start":20,"end":39}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::GetFilesInRange { start, end, .. } => {
                assert_eq!((start, end), (20, 39));
            }
            other => panic!("Expected GetFilesInRange command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_file_uploaded_with_record() {
        let json = r#"{"type":"fileUploaded","userId":"u1","parentFolderId":"docs",
            "file":{"id":"42","original_filename":"report.pdf","file_size":"2048",
                    "uploaded_at":"2024-05-01 10:00:00"}}"#;
        match parse_command(json.as_bytes()).unwrap() {
            Command::FileUploaded {
                parent_folder_id,
                file: Some(raw),
                ..
            } => {
                assert_eq!(parent_folder_id, "docs");
                let record = raw.normalize().unwrap();
                assert_eq!(record.file_id, "42");
                assert_eq!(record.file_name, "report.pdf");
                assert_eq!(record.file_size, 2048);
                assert!(record.uploaded_at.is_some());
            }
            other => panic!("Expected FileUploaded with a file, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_commands() {
        assert!(matches!(
            parse_command(br#"{"type":"getStatus"}"#).unwrap(),
            Command::GetStatus
        ));
        assert!(matches!(
            parse_command(br#"{"type":"subscribeEvictions"}"#).unwrap(),
            Command::SubscribeEvictions
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_and_incomplete() {
        assert!(parse_command(br#"{"type":"renameFolder"}"#).is_err());
        assert!(parse_command(br#"{"type":"isFolderCached","userId":"u1"}"#).is_err());
        assert!(parse_command(b"not json").is_err());
    }

    #[test]
    fn test_serialize_files_response() {
        let response = Response::Files {
            page: 2,
            files: vec![FileRecord::new("f1", "a.txt").with_uploaded_at(5)],
        };
        let value = to_value(&response);
        assert_eq!(value["type"], "files");
        assert_eq!(value["page"], 2);
        assert_eq!(value["files"][0]["fileId"], "f1");
        assert_eq!(value["files"][0]["uploadedAt"], 5);
    }

    #[test]
    fn test_serialize_ranged_files_flattens_record() {
        let response = Response::RangedFiles {
            files: vec![PositionedFile {
                position: 7,
                file: FileRecord::new("f7", "g.txt"),
            }],
        };
        let value = to_value(&response);
        assert_eq!(value["type"], "rangedFiles");
        assert_eq!(value["files"][0]["position"], 7);
        assert_eq!(value["files"][0]["fileName"], "g.txt");
    }

    #[test]
    fn test_serialize_simple_responses() {
        let value = to_value(&Response::error("Folder not found"));
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "Folder not found");

        let value = to_value(&Response::Evicted {
            cache_key: "u1:root".to_string(),
        });
        assert_eq!(value["type"], "evicted");
        assert_eq!(value["cacheKey"], "u1:root");

        let value = to_value(&Response::Flag { value: true });
        assert_eq!(value["value"], true);
    }

    #[test]
    fn test_serialize_status_response() {
        let response = Response::Status {
            version: PROTOCOL_VERSION,
            healthy: true,
            service_health: "healthy".to_string(),
            uptime_secs: 12,
            cache: CacheStats::default(),
            preload: PreloadStats::default(),
            recent_errors: Vec::new(),
        };
        let value = to_value(&response);
        assert_eq!(value["type"], "status");
        assert_eq!(value["serviceHealth"], "healthy");
        assert_eq!(value["cache"]["hitRate"], 0.0);
        assert_eq!(value["preload"]["queuedCount"], 0);
    }
}
