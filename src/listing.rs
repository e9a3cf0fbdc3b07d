//! Remote listing client
//!
//! Translates folder, trash and search views into provider queries. Every
//! listing asks for one capped page; continuation tokens are not followed.

use std::sync::Arc;

use crate::providers::query::DriveQuery;
use crate::providers::{DriveApi, Entry, EntryMetadata, ListRequest, ProviderError};

/// Fields requested for interactive views
const VIEW_FIELDS: &str = "id,name,mimeType,modifiedTime,size";
/// Fields requested for the sync pipeline
const SYNC_FIELDS: &str = "id,name,mimeType,size,parents,createdTime,modifiedTime,webViewLink";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub trashed: bool,
}

/// Result of a name search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The search text was blank; show the container unfiltered
    ShowContainer,
    Results(Vec<Entry>),
}

pub struct ListingClient {
    api: Arc<dyn DriveApi>,
    page_size: u32,
    sync_page_size: u32,
}

impl ListingClient {
    pub fn new(api: Arc<dyn DriveApi>, page_size: u32, sync_page_size: u32) -> Self {
        Self {
            api,
            page_size,
            sync_page_size,
        }
    }

    fn request(&self, query: DriveQuery) -> ListRequest {
        ListRequest {
            query: (!query.is_empty()).then(|| query.build()),
            fields: VIEW_FIELDS.to_string(),
            page_size: self.page_size,
        }
    }

    /// Direct children of a container
    pub async fn list_children(
        &self,
        container_id: &str,
        filter: ListFilter,
    ) -> Result<Vec<Entry>, ProviderError> {
        let query = DriveQuery::new()
            .in_parent(container_id)
            .trashed(filter.trashed);
        self.api.list_files(&self.request(query)).await
    }

    /// Everything currently in the trash
    pub async fn list_trashed(&self) -> Result<Vec<Entry>, ProviderError> {
        self.api
            .list_files(&self.request(DriveQuery::new().trashed(true)))
            .await
    }

    /// Non-trashed entries whose name contains `text`
    pub async fn list_by_name_contains(&self, text: &str) -> Result<SearchOutcome, ProviderError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SearchOutcome::ShowContainer);
        }
        let query = DriveQuery::new().name_contains(text).trashed(false);
        let entries = self.api.list_files(&self.request(query)).await?;
        Ok(SearchOutcome::Results(entries))
    }

    pub async fn get_metadata(
        &self,
        entry_id: &str,
        fields: &[&str],
    ) -> Result<EntryMetadata, ProviderError> {
        self.api.get_metadata(entry_id, fields).await
    }

    /// Every visible entry with parent and link fields, for the sync pipeline
    pub async fn list_all(&self) -> Result<Vec<Entry>, ProviderError> {
        let request = ListRequest {
            query: None,
            fields: SYNC_FIELDS.to_string(),
            page_size: self.sync_page_size,
        };
        self.api.list_files(&request).await
    }
}
