//! Google Drive Storage Provider
//!
//! Implements `DriveApi` against the Drive API v3 REST endpoints.
//! The bearer credential is installed by the session layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::RwLock;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    DriveApi, Entry, EntryMetadata, ListRequest, MetadataPatch, ProgressCallback, ProviderError,
    UploadRequest, UploadedFile, UserInfo,
};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Size of each streamed upload chunk
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

const MULTIPART_BOUNDARY: &str = "docudesk_boundary";

/// Google Drive file metadata from API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    created_time: Option<DateTime<Utc>>,
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    parents: Vec<String>,
    web_view_link: Option<String>,
    #[serde(default)]
    trashed: bool,
}

impl From<DriveFile> for Entry {
    fn from(file: DriveFile) -> Self {
        Entry {
            size: file.size.as_deref().and_then(|s| s.parse().ok()),
            parent_id: file.parents.into_iter().next(),
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            created_time: file.created_time,
            modified_time: file.modified_time,
            web_view_link: file.web_view_link,
            trashed: file.trashed,
        }
    }
}

/// Google Drive file list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Google Drive provider configuration
#[derive(Debug, Clone)]
pub struct GoogleDriveConfig {
    pub api_base: String,
    pub upload_base: String,
    pub userinfo_url: String,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
        }
    }
}

/// Google Drive Storage Provider
pub struct GoogleDriveProvider {
    config: GoogleDriveConfig,
    client: reqwest::Client,
    access_token: RwLock<Option<SecretString>>,
}

impl GoogleDriveProvider {
    pub fn new(config: GoogleDriveConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            access_token: RwLock::new(None),
        }
    }

    /// Get authorization header
    fn auth_header(&self) -> Result<HeaderValue, ProviderError> {
        let guard = self
            .access_token
            .read()
            .map_err(|_| ProviderError::Other("Credential lock poisoned".to_string()))?;
        let token = guard.as_ref().ok_or(ProviderError::NotAuthenticated)?;
        HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| ProviderError::Other(format!("Invalid token: {}", e)))
    }

    fn file_url(&self, entry_id: &str) -> String {
        format!(
            "{}/files/{}",
            self.config.api_base,
            urlencoding::encode(entry_id)
        )
    }

    /// Build the multipart/related body: JSON metadata part + binary part.
    ///
    /// Returns the body split into chunks, each paired with the number of file
    /// bytes it carries so progress only counts payload bytes.
    /// Opening and closing parts of a `multipart/related` upload body; the
    /// file bytes go between them.
    fn multipart_frame(request: &UploadRequest) -> (Vec<u8>, Vec<u8>) {
        let metadata = serde_json::json!({
            "name": request.name,
            "mimeType": request.mime_type,
            "parents": [request.parent_id],
        });

        let mut head = Vec::new();
        head.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        head.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        head.extend_from_slice(metadata.to_string().as_bytes());
        head.extend_from_slice(b"\r\n");
        head.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        head.extend_from_slice(format!("Content-Type: {}\r\n\r\n", request.mime_type).as_bytes());

        let tail = format!("\r\n--{}--", MULTIPART_BOUNDARY).into_bytes();
        (head, tail)
    }

    /// Turn a non-2xx response into a `ProviderError`
    async fn check_status(
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 404 {
            return Err(ProviderError::NotFound(context.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::ServerError {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DriveApi for GoogleDriveProvider {
    fn set_access_token(&self, token: Option<SecretString>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    fn has_access_token(&self) -> bool {
        self.access_token
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    async fn user_info(&self) -> Result<UserInfo, ProviderError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;

        let response = Self::check_status(response, "userinfo").await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("userinfo: {}", e)))
    }

    async fn list_files(&self, request: &ListRequest) -> Result<Vec<Entry>, ProviderError> {
        let mut params = vec![
            ("fields", format!("files({}),nextPageToken", request.fields)),
            ("pageSize", request.page_size.to_string()),
        ];
        if let Some(ref q) = request.query {
            params.push(("q", q.clone()));
        }

        let url = url::Url::parse_with_params(&format!("{}/files", self.config.api_base), &params)
            .map_err(|e| ProviderError::Other(format!("Invalid list URL: {}", e)))?;

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;

        let response = Self::check_status(response, "files.list").await?;
        let list: DriveFileList = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("files.list: {}", e)))?;

        if list.next_page_token.is_some() {
            debug!(
                "Listing truncated at {} entries (query: {:?})",
                request.page_size, request.query
            );
        }

        Ok(list.files.into_iter().map(Entry::from).collect())
    }

    async fn get_metadata(
        &self,
        entry_id: &str,
        fields: &[&str],
    ) -> Result<EntryMetadata, ProviderError> {
        let url = url::Url::parse_with_params(
            &self.file_url(entry_id),
            &[("fields", fields.join(","))],
        )
        .map_err(|e| ProviderError::Other(format!("Invalid metadata URL: {}", e)))?;

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;

        let response = Self::check_status(response, entry_id).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("files.get: {}", e)))
    }

    async fn upload_file(
        &self,
        request: &UploadRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<UploadedFile, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let file = tokio::fs::File::open(&request.local_path).await?;
        let total = file.metadata().await?.len();
        let (head, tail) = Self::multipart_frame(request);

        let mut sent = 0u64;
        let file_stream = ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE).map(move |chunk| {
            let chunk = chunk?;
            sent += chunk.len() as u64;
            on_progress(sent, total);
            Ok::<Vec<u8>, std::io::Error>(Vec::from(chunk))
        });
        let body_stream = stream::iter([Ok::<Vec<u8>, std::io::Error>(head)])
            .chain(file_stream)
            .chain(stream::iter([Ok(tail)]));

        let url = format!(
            "{}/files?uploadType=multipart&fields=id",
            self.config.upload_base
        );

        let send = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.auth_header()?)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(reqwest::Body::wrap_stream(body_stream))
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Upload of {} aborted", request.name);
                return Err(ProviderError::Cancelled);
            }
            result = send => result?,
        };

        let response = Self::check_status(response, &request.name).await?;
        let uploaded: UploadedFile = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("upload: {}", e)))?;

        info!("Uploaded {} as {}", request.name, uploaded.id);
        Ok(uploaded)
    }

    async fn download_file(
        &self,
        entry_id: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, ProviderError> {
        let url = format!("{}?alt=media", self.file_url(entry_id));

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;

        let response = Self::check_status(response, entry_id).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        debug!("Downloaded {} bytes of {}", written, entry_id);
        Ok(written)
    }

    async fn update_metadata(
        &self,
        entry_id: &str,
        patch: &MetadataPatch,
    ) -> Result<(), ProviderError> {
        let response = self
            .client
            .patch(self.file_url(entry_id))
            .header(AUTHORIZATION, self.auth_header()?)
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_string(patch).map_err(|e| ProviderError::Other(e.to_string()))?)
            .send()
            .await?;

        Self::check_status(response, entry_id).await?;
        info!("Updated metadata of {}", entry_id);
        Ok(())
    }

    async fn delete_file(&self, entry_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.file_url(entry_id))
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await?;

        Self::check_status(response, entry_id).await?;
        info!("Deleted: {}", entry_id);
        Ok(())
    }
}
