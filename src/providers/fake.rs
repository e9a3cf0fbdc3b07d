//! In-memory `DriveApi` used by unit tests.
//!
//! Answers listings from a seeded entry table, records every call, and can be
//! told to fail or to block uploads until cancelled.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{
    DriveApi, Entry, EntryMetadata, ListRequest, MetadataPatch, ProgressCallback, ProviderError,
    UploadRequest, UploadedFile, UserInfo,
};

/// A recorded remote call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UserInfo,
    List(Option<String>),
    Metadata(String),
    Upload(String),
    Download(String),
    Update(String, MetadataPatch),
    Delete(String),
}

type UploadHook = Arc<dyn Fn(&UploadRequest) + Send + Sync>;

#[derive(Default)]
pub struct FakeDrive {
    entries: Mutex<Vec<Entry>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    user: Mutex<Option<UserInfo>>,
    token: Mutex<Option<SecretString>>,
    calls: Mutex<Vec<Call>>,
    failing_uploads: Mutex<HashSet<String>>,
    failing_ids: Mutex<HashSet<String>>,
    upload_hook: Mutex<Option<UploadHook>>,
    hang_uploads: AtomicBool,
    upload_counter: Mutex<u32>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<Entry>) -> Self {
        let fake = Self::new();
        *fake.entries.lock().unwrap() = entries;
        fake
    }

    pub fn set_user(&self, user: Option<UserInfo>) {
        *self.user.lock().unwrap() = user;
    }

    pub fn set_content(&self, id: &str, bytes: &[u8]) {
        self.contents.lock().unwrap().insert(id.to_string(), bytes.to_vec());
    }

    /// Uploads of this file name fail with a 500
    pub fn fail_upload_of(&self, name: &str) {
        self.failing_uploads.lock().unwrap().insert(name.to_string());
    }

    /// Metadata, update and delete calls on this id fail with a 500
    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// Called at the start of each upload, before it resolves
    pub fn on_upload(&self, hook: impl Fn(&UploadRequest) + Send + Sync + 'static) {
        *self.upload_hook.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Uploads never complete on their own; only cancellation resolves them
    pub fn hang_uploads(&self) {
        self.hang_uploads.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn entry(&self, id: &str) -> Option<Entry> {
        self.entries.lock().unwrap().iter().find(|e| e.id == id).cloned()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_failing(&self, id: &str) -> Result<(), ProviderError> {
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(ProviderError::ServerError {
                status: 500,
                body: "backend error".to_string(),
            });
        }
        Ok(())
    }
}

/// Evaluate the handful of clause shapes the application produces
fn matches(entry: &Entry, query: Option<&str>) -> bool {
    let Some(query) = query else { return true };
    query.split(" and ").all(|clause| {
        if let Some(rest) = clause.strip_suffix("' in parents") {
            let id = rest.trim_start_matches('\'');
            entry.parent_id.as_deref() == Some(id)
        } else if let Some(flag) = clause.strip_prefix("trashed=") {
            entry.trashed == (flag == "true")
        } else if let Some(text) = clause.strip_prefix("name contains '") {
            let text = text.trim_end_matches('\'').replace("\\'", "'").replace("\\\\", "\\");
            entry.name.contains(&text)
        } else {
            true
        }
    })
}

#[async_trait]
impl DriveApi for FakeDrive {
    fn set_access_token(&self, token: Option<SecretString>) {
        *self.token.lock().unwrap() = token;
    }

    fn has_access_token(&self) -> bool {
        self.token.lock().unwrap().is_some()
    }

    async fn user_info(&self) -> Result<UserInfo, ProviderError> {
        self.record(Call::UserInfo);
        if !self.has_access_token() {
            return Err(ProviderError::NotAuthenticated);
        }
        self.user.lock().unwrap().clone().ok_or(ProviderError::ServerError {
            status: 401,
            body: "invalid credentials".to_string(),
        })
    }

    async fn list_files(&self, request: &ListRequest) -> Result<Vec<Entry>, ProviderError> {
        self.record(Call::List(request.query.clone()));
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches(e, request.query.as_deref()))
            .take(request.page_size as usize)
            .cloned()
            .collect())
    }

    async fn get_metadata(
        &self,
        entry_id: &str,
        _fields: &[&str],
    ) -> Result<EntryMetadata, ProviderError> {
        self.record(Call::Metadata(entry_id.to_string()));
        self.check_failing(entry_id)?;
        let entry = self
            .entry(entry_id)
            .ok_or_else(|| ProviderError::NotFound(entry_id.to_string()))?;
        Ok(EntryMetadata {
            id: Some(entry.id),
            name: Some(entry.name),
            mime_type: Some(entry.mime_type),
            parents: entry.parent_id.into_iter().collect(),
        })
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
        self.record(Call::Upload(request.name.clone()));

        let hook = self.upload_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(request);
        }

        if self.hang_uploads.load(Ordering::SeqCst) {
            on_progress(request.size / 2, request.size);
            cancel.cancelled().await;
            return Err(ProviderError::Cancelled);
        }
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.failing_uploads.lock().unwrap().contains(&request.name) {
            return Err(ProviderError::ServerError {
                status: 500,
                body: "upload rejected".to_string(),
            });
        }

        on_progress(request.size / 2, request.size);
        on_progress(request.size, request.size);

        let id = {
            let mut counter = self.upload_counter.lock().unwrap();
            *counter += 1;
            format!("up-{}", counter)
        };
        self.entries.lock().unwrap().push(
            Entry::new(&id, &request.name, &request.mime_type)
                .with_size(request.size)
                .with_parent(&request.parent_id),
        );
        Ok(UploadedFile { id })
    }

    async fn download_file(
        &self,
        entry_id: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, ProviderError> {
        self.record(Call::Download(entry_id.to_string()));
        let bytes = self
            .contents
            .lock()
            .unwrap()
            .get(entry_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(entry_id.to_string()))?;
        sink.write_all(&bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn update_metadata(
        &self,
        entry_id: &str,
        patch: &MetadataPatch,
    ) -> Result<(), ProviderError> {
        self.record(Call::Update(entry_id.to_string(), patch.clone()));
        self.check_failing(entry_id)?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| ProviderError::NotFound(entry_id.to_string()))?;
        if let Some(ref name) = patch.name {
            entry.name = name.clone();
        }
        if let Some(trashed) = patch.trashed {
            entry.trashed = trashed;
        }
        Ok(())
    }

    async fn delete_file(&self, entry_id: &str) -> Result<(), ProviderError> {
        self.record(Call::Delete(entry_id.to_string()));
        self.check_failing(entry_id)?;
        self.entries.lock().unwrap().retain(|e| e.id != entry_id);
        Ok(())
    }
}
