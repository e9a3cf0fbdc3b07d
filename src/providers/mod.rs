//! Storage Provider Module
//!
//! This module provides the abstraction layer between the application and the
//! hosted storage service. Every remote call the application makes goes through
//! the `DriveApi` trait, so listing, transfer and mutation logic never builds
//! HTTP requests directly and can be exercised against an in-memory fake.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │ ListingClient│ │TransferManager│ │MutationClient│
//! └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!        └────────────────┼────────────────┘
//!                         ▼
//!              ┌─────────────────────┐
//!              │   DriveApi trait    │
//!              └──────────┬──────────┘
//!                         ▼
//!              ┌─────────────────────┐
//!              │ GoogleDriveProvider │
//!              └─────────────────────┘
//! ```

pub mod types;
pub mod query;
pub mod oauth2;
pub mod google_drive;

#[cfg(test)]
pub mod fake;

pub use types::*;
pub use google_drive::{GoogleDriveConfig, GoogleDriveProvider};
pub use oauth2::{OAuth2Manager, OAuthConfig, StoredTokens};

use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Progress callback: (bytes_transferred, total_bytes)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Remote storage API used by the application.
///
/// One method per remote operation. Implementations hold the active access
/// credential; `set_access_token(None)` clears it.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Install or clear the bearer credential used for subsequent calls
    fn set_access_token(&self, token: Option<SecretString>);

    /// Whether a credential is currently installed
    fn has_access_token(&self) -> bool;

    /// Fetch the identity of the credential's owner
    async fn user_info(&self) -> Result<UserInfo, ProviderError>;

    /// Run one files.list request (a single, capped page)
    async fn list_files(&self, request: &ListRequest) -> Result<Vec<Entry>, ProviderError>;

    /// Fetch selected metadata fields for one entry
    async fn get_metadata(
        &self,
        entry_id: &str,
        fields: &[&str],
    ) -> Result<EntryMetadata, ProviderError>;

    /// Upload a local file into a container.
    ///
    /// `on_progress` is invoked as file bytes go out. Resolves once the
    /// provider acknowledges the upload; fails with `ProviderError::Cancelled`
    /// when `cancel` fires first.
    async fn upload_file(
        &self,
        request: &UploadRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<UploadedFile, ProviderError>;

    /// Stream the raw bytes of a file into `sink`, returning the byte count
    async fn download_file(
        &self,
        entry_id: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, ProviderError>;

    /// Apply a partial metadata update (also used for trash/restore)
    async fn update_metadata(
        &self,
        entry_id: &str,
        patch: &MetadataPatch,
    ) -> Result<(), ProviderError>;

    /// Permanently delete an entry
    async fn delete_file(&self, entry_id: &str) -> Result<(), ProviderError>;
}
