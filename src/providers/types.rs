//! Shared types for the storage provider layer
//!
//! This module contains the types exchanged between the provider API seam and
//! the rest of the application: entry records, identity, upload requests,
//! progress reports and the error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// MIME type the provider uses for folders
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Prefix shared by provider-native document types (Docs, Sheets, folders...)
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// Well-known alias for the root container
pub const ROOT_ID: &str = "root";

/// A file or folder record returned by the storage provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Opaque, unique remote id
    pub id: String,
    /// Display name
    pub name: String,
    /// Content-type classifier
    pub mime_type: String,
    /// Byte size, absent for folders and provider-native documents
    pub size: Option<u64>,
    /// Parent container (this model tracks at most one)
    pub parent_id: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    /// Open/view link
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl Entry {
    /// Create a bare entry (used by tests and fakes)
    pub fn new(id: &str, name: &str, mime_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: None,
            parent_id: None,
            created_time: None,
            modified_time: None,
            web_view_link: None,
            trashed: false,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    /// Provider-native documents have no downloadable byte size
    pub fn is_native_document(&self) -> bool {
        self.mime_type.starts_with(NATIVE_MIME_PREFIX)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }
}

/// Single-entry metadata answer (only the requested fields are populated)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub id: Option<String>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl EntryMetadata {
    /// First (and in this model only) parent
    pub fn parent(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

/// Identity of the signed-in user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
}

/// A files.list request, already reduced to provider query terms.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    /// Query expression (`q`); `None` lists everything visible to the user
    pub query: Option<String>,
    /// Comma separated field projection for each file
    pub fields: String,
    /// Capped page size; only one page is ever requested
    pub page_size: u32,
}

/// Upload description handed to the provider
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub parent_id: String,
    pub size: u64,
}

/// Provider acknowledgement of a completed upload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadedFile {
    pub id: String,
}

/// Partial metadata update; only `Some` fields are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed: Option<bool>,
}

impl MetadataPatch {
    pub fn trashed(trashed: bool) -> Self {
        Self {
            trashed: Some(trashed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.starred.is_none()
            && self.trashed.is_none()
    }
}

/// Transfer progress information
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
    /// Whole percent sent, rounded down so 100 means every byte was sent
    pub percent: u8,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes > 0 {
            ((bytes_transferred as f64 / total_bytes as f64) * 100.0).floor() as u8
        } else {
            100
        };

        Self {
            bytes_transferred,
            total_bytes,
            percent: percent.min(100),
        }
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Server returned {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("An upload batch is already running")]
    UploadInProgress,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Coarse classification used for user-facing messages
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::NotAuthenticated | ProviderError::AuthenticationFailed(_) => {
                ErrorKind::Authorization
            }
            ProviderError::NetworkError(_) | ProviderError::IoError(_) => ErrorKind::Transport,
            ProviderError::ServerError { status, .. } if *status == 401 || *status == 403 => {
                ErrorKind::Authorization
            }
            ProviderError::ServerError { .. } | ProviderError::NotFound(_) => ErrorKind::Status,
            ProviderError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::ParseError(e.to_string())
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}

/// Error taxonomy surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Transport,
    Status,
    Cancelled,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Authorization => write!(f, "authorization error"),
            ErrorKind::Transport => write!(f, "network error"),
            ErrorKind::Status => write!(f, "provider error"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Other => write!(f, "error"),
        }
    }
}
