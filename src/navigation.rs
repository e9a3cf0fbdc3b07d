//! Navigation state: current container, its parent, and the back affordance.

use tracing::debug;

use crate::listing::ListingClient;
use crate::providers::{ProviderError, ROOT_ID};

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationState {
    current: String,
    parent: Option<String>,
    /// The provider's concrete id for the root folder, once known
    root_alias: Option<String>,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            current: ROOT_ID.to_string(),
            parent: None,
            root_alias: None,
        }
    }
}

/// Where navigation landed after a move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Root,
    Folder(String),
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn set_root_alias(&mut self, id: impl Into<String>) {
        self.root_alias = Some(id.into());
    }

    /// True for the root sentinel and for the provider's own root id
    pub fn is_root(&self, id: &str) -> bool {
        id == ROOT_ID || self.root_alias.as_deref() == Some(id)
    }

    pub fn at_root(&self) -> bool {
        self.is_root(&self.current)
    }

    pub fn back_visible(&self) -> bool {
        !self.at_root() && self.parent.is_some()
    }

    /// Move into `folder_id`, resolving its parent for the back affordance
    pub async fn enter_folder(
        &mut self,
        listing: &ListingClient,
        folder_id: &str,
    ) -> Result<Location, ProviderError> {
        if self.is_root(folder_id) {
            self.return_to_root();
            return Ok(Location::Root);
        }

        let metadata = listing.get_metadata(folder_id, &["id", "parents"]).await?;
        let parent = metadata.parent().map(str::to_string);
        debug!("Entering {} (parent {:?})", folder_id, parent);

        self.current = folder_id.to_string();
        self.parent = parent;
        Ok(Location::Folder(folder_id.to_string()))
    }

    /// Re-enter the parent, or fall back to root when there is none
    pub async fn go_back(&mut self, listing: &ListingClient) -> Result<Location, ProviderError> {
        match self.parent.clone() {
            Some(parent) if !self.is_root(&parent) => self.enter_folder(listing, &parent).await,
            _ => {
                self.return_to_root();
                Ok(Location::Root)
            }
        }
    }

    pub fn return_to_root(&mut self) {
        self.current = ROOT_ID.to_string();
        self.parent = None;
    }
}
