// DocuDesk Sync Module
// Mirrors entry metadata into the local ingestion backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::listing::ListingClient;
use crate::providers::{Entry, ProviderError};

/// One entry as the backend ingests it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    #[serde(rename = "drive_id")]
    pub remote_id: String,
    pub title: String,
    #[serde(rename = "file_type")]
    pub mime_type: String,
    /// Zero for folders and provider-native documents
    #[serde(rename = "file_size")]
    pub size: u64,
    #[serde(rename = "folder_id")]
    pub parent_id: Option<String>,
    #[serde(rename = "uploaded_by")]
    pub owner: u64,
    #[serde(rename = "upload_date")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "file_url")]
    pub url: Option<String>,
    pub tags: String,
}

impl SyncRecord {
    pub fn from_entry(entry: &Entry, owner: u64) -> Self {
        let size = if entry.is_native_document() {
            0
        } else {
            entry.size.unwrap_or(0)
        };
        Self {
            remote_id: entry.id.clone(),
            title: entry.name.clone(),
            mime_type: entry.mime_type.clone(),
            size,
            parent_id: entry.parent_id.clone(),
            owner,
            created_at: entry.created_time,
            url: entry.web_view_link.clone(),
            tags: String::new(),
        }
    }
}

/// Destination for sync records. `send` resolves once the record is stored.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn send(&self, record: &SyncRecord) -> Result<(), ProviderError>;
}

/// Backend reached over HTTP: one JSON POST per record, success is any 2xx
pub struct HttpBackend {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MetadataSink for HttpBackend {
    async fn send(&self, record: &SyncRecord) -> Result<(), ProviderError> {
        let response = self.client.post(&self.endpoint).json(record).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::ServerError {
            status: status.as_u16(),
            body,
        })
    }
}

/// Outcome of a sync run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub folders_sent: u32,
    pub files_sent: u32,
    /// (entry id, reason)
    pub failed: Vec<(String, String)>,
    /// Entries not sent because their parent folder failed
    pub skipped: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Order folders so every parent present in the set precedes its children.
/// Input order is kept otherwise; a cycle is broken at its first member.
pub fn order_folders(folders: Vec<Entry>) -> Vec<Entry> {
    let ids: HashSet<String> = folders.iter().map(|f| f.id.clone()).collect();
    let mut emitted: HashSet<String> = HashSet::new();
    let mut remaining = folders;
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|f| match f.parent_id {
            Some(ref parent) => !ids.contains(parent) || emitted.contains(parent),
            None => true,
        });
        let next = remaining.remove(ready.unwrap_or(0));
        emitted.insert(next.id.clone());
        ordered.push(next);
    }
    ordered
}

pub struct FileSync {
    sink: Arc<dyn MetadataSink>,
    owner: u64,
}

impl FileSync {
    pub fn new(sink: Arc<dyn MetadataSink>, owner: u64) -> Self {
        Self { sink, owner }
    }

    /// Enumerate every entry and forward folders (parents first), then files.
    ///
    /// Each record is acknowledged before the next is sent. Only the listing
    /// itself can fail the run; record failures are collected in the report.
    pub async fn run(&self, listing: &ListingClient) -> Result<SyncReport, ProviderError> {
        let entries = listing.list_all().await?;
        let mut report = SyncReport::default();

        if entries.is_empty() {
            warn!("No files found to sync");
            return Ok(report);
        }

        let (folders, files): (Vec<Entry>, Vec<Entry>) =
            entries.into_iter().partition(Entry::is_folder);

        let mut failed_folders: HashSet<String> = HashSet::new();

        for folder in order_folders(folders) {
            if self.skip_if_orphaned(&folder, &failed_folders, &mut report) {
                failed_folders.insert(folder.id.clone());
                continue;
            }
            debug!("Sending folder {}", folder.name);
            match self.sink.send(&SyncRecord::from_entry(&folder, self.owner)).await {
                Ok(()) => report.folders_sent += 1,
                Err(e) => {
                    warn!("Backend rejected folder {}: {}", folder.name, e);
                    failed_folders.insert(folder.id.clone());
                    report.failed.push((folder.id, e.to_string()));
                }
            }
        }

        for file in files {
            if self.skip_if_orphaned(&file, &failed_folders, &mut report) {
                continue;
            }
            debug!("Sending file {}", file.name);
            match self.sink.send(&SyncRecord::from_entry(&file, self.owner)).await {
                Ok(()) => report.files_sent += 1,
                Err(e) => {
                    warn!("Backend rejected file {}: {}", file.name, e);
                    report.failed.push((file.id, e.to_string()));
                }
            }
        }

        info!(
            "Sync finished: {} folder(s), {} file(s), {} failed, {} skipped",
            report.folders_sent,
            report.files_sent,
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn skip_if_orphaned(
        &self,
        entry: &Entry,
        failed_folders: &HashSet<String>,
        report: &mut SyncReport,
    ) -> bool {
        let orphaned = entry
            .parent_id
            .as_ref()
            .is_some_and(|p| failed_folders.contains(p));
        if orphaned {
            warn!("Skipping {}: parent folder was not stored", entry.name);
            report.skipped.push(entry.id.clone());
        }
        orphaned
    }
}
