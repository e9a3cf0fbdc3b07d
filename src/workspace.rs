//! Application state object
//!
//! `Workspace` owns everything a front end displays: the session, the
//! current location, the rendered cards, the open menu, the previewed entry
//! and the upload queue. Each handler runs one user action to completion and
//! reports failures through the `Notifier` instead of returning them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::AppConfig;
use crate::credential_store::CredentialStore;
use crate::listing::{ListFilter, ListingClient, SearchOutcome};
use crate::mutation::{DeleteOutcome, MutationClient};
use crate::navigation::{Location, NavigationState};
use crate::providers::{DriveApi, Entry, MetadataPatch, ProviderError, ROOT_ID};
use crate::session::{Authorizer, PromptMode, Session, SessionManager};
use crate::sync::{FileSync, MetadataSink, SyncReport};
use crate::transfer::{CompletedTransfer, PendingTransfer, TransferManager, TransferObserver};
use crate::view::{
    ActionTarget, DocumentsPane, MenuKind, MenuPosition, Overlays, PreviewContext, PreviewTarget,
    Rect, RenderMode, ShareAction,
};

pub use crate::mutation::Confirm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Surfaces short messages to the user
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// What the documents pane currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Folder,
    Search,
    Trash,
}

/// External collaborators a workspace is built from
pub struct Services {
    pub api: Arc<dyn DriveApi>,
    pub authorizer: Arc<dyn Authorizer>,
    pub credentials: CredentialStore,
    pub sink: Arc<dyn MetadataSink>,
    pub notifier: Arc<dyn Notifier>,
    pub confirm: Arc<dyn Confirm>,
}

/// Sets the busy flag for its lifetime
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn new(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Workspace {
    config: AppConfig,
    session: SessionManager,
    listing: ListingClient,
    mutations: MutationClient,
    transfers: Arc<TransferManager>,
    sync: FileSync,
    navigation: NavigationState,
    pane: DocumentsPane,
    view: ViewKind,
    overlays: Overlays,
    preview: Option<PreviewContext>,
    notifier: Arc<dyn Notifier>,
    confirm: Arc<dyn Confirm>,
    busy: Arc<AtomicBool>,
}

impl Workspace {
    pub fn new(config: AppConfig, services: Services) -> Self {
        let Services {
            api,
            authorizer,
            credentials,
            sink,
            notifier,
            confirm,
        } = services;

        Self {
            session: SessionManager::new(api.clone(), authorizer, credentials),
            listing: ListingClient::new(api.clone(), config.page_size, config.sync_page_size),
            mutations: MutationClient::new(api.clone()),
            transfers: Arc::new(TransferManager::new(api)),
            sync: FileSync::new(sink, config.owner_id),
            navigation: NavigationState::new(),
            pane: DocumentsPane::new(),
            view: ViewKind::Folder,
            overlays: Overlays::new(Duration::from_millis(config.menu_hide_delay_ms)),
            preview: None,
            notifier,
            confirm,
            busy: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    // ============ Accessors ============

    pub fn session(&self) -> Option<&Session> {
        self.session.current()
    }

    pub fn display_name(&self) -> &str {
        self.session.display_name()
    }

    pub fn initials(&self) -> &str {
        self.session.initials()
    }

    pub fn pane(&self) -> &DocumentsPane {
        &self.pane
    }

    pub fn navigation(&self) -> &NavigationState {
        &self.navigation
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn overlays(&self) -> &Overlays {
        &self.overlays
    }

    pub fn overlays_mut(&mut self) -> &mut Overlays {
        &mut self.overlays
    }

    pub fn preview_context(&self) -> Option<&PreviewContext> {
        self.preview.as_ref()
    }

    pub fn back_visible(&self) -> bool {
        self.view == ViewKind::Folder && self.navigation.back_visible()
    }

    /// Shared handle so another task can cancel uploads
    pub fn transfers(&self) -> Arc<TransferManager> {
        self.transfers.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn info(&self, message: &str) {
        self.notifier.notify(NoticeLevel::Info, message);
    }

    fn fail(&self, message: &str, e: &ProviderError) {
        error!("{}: {}", message, e);
        self.notifier
            .notify(NoticeLevel::Error, &format!("{} ({})", message, e.kind()));
    }

    // ============ Session ============

    /// Interactive sign-in followed by the root listing
    pub async fn login(&mut self) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        let signed_in = self
            .session
            .ensure_authorized(PromptMode::Interactive)
            .await
            .map(|_| ());
        if let Err(e) = signed_in {
            self.fail("Sign-in failed", &e);
            return false;
        }
        self.after_sign_in().await
    }

    /// Re-validate a stored credential at startup
    pub async fn restore(&mut self) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        let restored = self.session.restore_session().await.map(|s| s.is_some());
        match restored {
            Ok(true) => self.after_sign_in().await,
            Ok(false) => false,
            Err(e) => {
                self.fail("Could not restore session", &e);
                false
            }
        }
    }

    async fn after_sign_in(&mut self) -> bool {
        match self.listing.get_metadata(ROOT_ID, &["id"]).await {
            Ok(meta) => {
                if let Some(id) = meta.id {
                    self.navigation.set_root_alias(id);
                }
            }
            Err(e) => debug!("Root id lookup failed: {}", e),
        }
        self.load_root().await
    }

    /// Make sure a session exists, signing in if needed
    async fn authorized(&mut self) -> bool {
        if self.session.current().is_some() {
            return true;
        }
        let signed_in = self
            .session
            .ensure_authorized(PromptMode::Silent)
            .await
            .map(|_| ());
        match signed_in {
            Ok(()) => true,
            Err(e) => {
                self.fail("Sign-in required", &e);
                false
            }
        }
    }

    pub fn logout(&mut self) {
        if let Err(e) = self.session.logout() {
            warn!("Logout left a stored credential behind: {}", e);
        }
        self.pane.clear();
        self.navigation.return_to_root();
        self.view = ViewKind::Folder;
        self.preview = None;
        self.overlays.close();
        self.info("Signed out");
    }

    // ============ Navigation ============

    pub async fn show_root(&mut self) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return false;
        }
        self.load_root().await
    }

    async fn load_root(&mut self) -> bool {
        self.navigation.return_to_root();
        self.load_current().await
    }

    /// List the current container into the pane
    async fn load_current(&mut self) -> bool {
        let container = self.navigation.current().to_string();
        match self.listing.list_children(&container, ListFilter::default()).await {
            Ok(entries) => {
                self.show(&entries, ViewKind::Folder);
                true
            }
            Err(e) => {
                self.fail("Failed to list files", &e);
                false
            }
        }
    }

    fn show(&mut self, entries: &[Entry], view: ViewKind) {
        let mode = match view {
            ViewKind::Trash => RenderMode::Trash,
            _ => RenderMode::Normal,
        };
        self.pane.render(entries, mode);
        self.view = view;
        self.overlays.close();
    }

    /// Enter a folder and list it
    pub async fn open_entry(&mut self, folder_id: &str) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return false;
        }
        if let Err(e) = self.navigation.enter_folder(&self.listing, folder_id).await {
            self.fail("Failed to open folder", &e);
            return false;
        }
        self.load_current().await
    }

    pub async fn go_back(&mut self) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return false;
        }
        match self.navigation.go_back(&self.listing).await {
            Ok(Location::Root) | Ok(Location::Folder(_)) => self.load_current().await,
            Err(e) => {
                self.fail("Failed to go back", &e);
                false
            }
        }
    }

    /// Reload whatever view is showing
    pub async fn refresh(&mut self) -> bool {
        match self.view {
            ViewKind::Trash => self.show_trash().await,
            _ => {
                let _busy = BusyGuard::new(&self.busy);
                self.load_current().await
            }
        }
    }

    /// Search by name. At root the provider is queried; inside a folder the
    /// rendered cards are filtered locally.
    pub async fn search(&mut self, text: &str) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.navigation.at_root() && self.view == ViewKind::Folder {
            let shown = self.pane.filter(text);
            debug!("Local filter {:?} shows {} card(s)", text, shown);
            return true;
        }
        if !self.authorized().await {
            return false;
        }
        match self.listing.list_by_name_contains(text).await {
            Ok(SearchOutcome::ShowContainer) => self.load_root().await,
            Ok(SearchOutcome::Results(entries)) => {
                self.show(&entries, ViewKind::Search);
                true
            }
            Err(e) => {
                self.fail("Search failed", &e);
                false
            }
        }
    }

    pub async fn show_trash(&mut self) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return false;
        }
        match self.listing.list_trashed().await {
            Ok(entries) => {
                self.show(&entries, ViewKind::Trash);
                true
            }
            Err(e) => {
                self.fail("Failed to load trash", &e);
                false
            }
        }
    }

    // ============ Preview & menus ============

    /// Preview an entry; folders are entered instead
    pub async fn preview(&mut self, entry_id: &str) -> Option<PreviewTarget> {
        let (name, mime_type) = match self.pane.find(entry_id) {
            Some(card) => (card.name.clone(), card.mime_type.clone()),
            None => {
                self.info("File not found in the current view");
                return None;
            }
        };

        let target = PreviewTarget::for_entry(entry_id, &mime_type);
        if let PreviewTarget::EnterFolder(ref folder_id) = target {
            let folder_id = folder_id.clone();
            self.open_entry(&folder_id).await;
            return Some(target);
        }

        self.preview = Some(PreviewContext {
            entry_id: entry_id.to_string(),
            name,
            mime_type,
        });
        Some(target)
    }

    pub fn close_preview(&mut self) {
        self.preview = None;
    }

    /// Open a menu for a rendered card
    pub fn open_menu(
        &mut self,
        kind: MenuKind,
        entry_id: &str,
        trigger: Rect,
        scroll_x: f64,
        scroll_y: f64,
    ) -> Option<MenuPosition> {
        let card = self.pane.find(entry_id)?;
        let target = ActionTarget {
            entry_id: card.entry_id.clone(),
            name: card.name.clone(),
        };
        Some(self.overlays.open(kind, target, trigger, scroll_x, scroll_y))
    }

    /// Link for sharing the current menu target
    pub fn share(&mut self, action: ShareAction) -> Option<String> {
        let Some(target) = self.overlays.target() else {
            self.info("No file selected to share");
            return None;
        };
        let url = action.url(target);
        self.overlays.close();
        Some(url)
    }

    // ============ Transfers ============

    pub async fn download(&mut self, entry_id: &str) -> Option<PathBuf> {
        let dest = self.config.download_dir.clone();
        self.download_to(entry_id, &dest).await
    }

    pub async fn download_to(&mut self, entry_id: &str, dest_dir: &Path) -> Option<PathBuf> {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return None;
        }
        let (name, mime_type) = match self.describe(entry_id).await {
            Ok(found) => found,
            Err(e) => {
                self.fail("Failed to download file", &e);
                return None;
            }
        };

        match self
            .transfers
            .download(entry_id, &name, Some(&mime_type), dest_dir)
            .await
        {
            Ok(path) => {
                self.info(&format!("Saved \"{}\" to {}", name, path.display()));
                Some(path)
            }
            Err(e) => {
                self.fail(&format!("Failed to download \"{}\"", name), &e);
                None
            }
        }
    }

    /// Name and type of an entry, from the rendered cards, the preview, or
    /// the provider
    async fn describe(&self, entry_id: &str) -> Result<(String, String), ProviderError> {
        if let Some(card) = self.pane.find(entry_id) {
            return Ok((card.name.clone(), card.mime_type.clone()));
        }
        if let Some(ref preview) = self.preview {
            if preview.entry_id == entry_id {
                return Ok((preview.name.clone(), preview.mime_type.clone()));
            }
        }
        let meta = self
            .listing
            .get_metadata(entry_id, &["id", "name", "mimeType"])
            .await?;
        Ok((
            meta.name.unwrap_or_else(|| entry_id.to_string()),
            meta.mime_type.unwrap_or_default(),
        ))
    }

    pub async fn add_uploads(&mut self, paths: &[PathBuf]) -> Vec<PendingTransfer> {
        let mut added = Vec::new();
        for path in paths {
            match self.transfers.enqueue(path).await {
                Ok(item) => added.push(item),
                Err(e) => self.fail(&format!("Cannot upload {}", path.display()), &e),
            }
        }
        added
    }

    pub fn remove_upload(&mut self, transfer_id: &str) -> bool {
        self.transfers.remove(transfer_id)
    }

    pub fn pending_uploads(&self) -> Vec<PendingTransfer> {
        self.transfers.pending()
    }

    /// Upload the queue into the current folder
    pub async fn upload_pending(
        &mut self,
        observer: Option<TransferObserver>,
    ) -> Option<Vec<CompletedTransfer>> {
        let _busy = BusyGuard::new(&self.busy);
        if self.transfers.is_empty() {
            self.info("No files selected for upload.");
            return None;
        }
        if !self.authorized().await {
            return None;
        }

        let target = self.navigation.current().to_string();
        let result = self.transfers.upload_all(&target, observer).await;
        match result {
            Ok(done) => {
                self.info(&format!("Uploaded {} file(s)", done.len()));
                self.load_current().await;
                Some(done)
            }
            Err(ProviderError::Cancelled) => {
                self.info("Upload cancelled");
                None
            }
            Err(ProviderError::UploadInProgress) => {
                self.info("An upload is already in progress.");
                None
            }
            Err(e) => {
                self.fail("Error uploading files.", &e);
                None
            }
        }
    }

    pub fn cancel_uploads(&self) {
        self.transfers.cancel();
    }

    // ============ Mutations ============

    fn entry_name(&self, entry_id: &str) -> String {
        self.pane
            .find(entry_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| entry_id.to_string())
    }

    /// Move to trash after confirmation; true when the entry was trashed
    pub async fn trash_entry(&mut self, entry_id: &str) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        let name = self.entry_name(entry_id);
        if !self
            .confirm
            .confirm(&format!("Are you sure you want to move \"{}\" to Trash?", name))
        {
            return false;
        }
        if !self.authorized().await {
            return false;
        }
        match self.mutations.trash(entry_id).await {
            Ok(()) => {
                self.info(&format!("Moved \"{}\" to Trash", name));
                self.load_current().await;
                true
            }
            Err(e) => {
                self.fail(&format!("Failed to delete \"{}\"", name), &e);
                false
            }
        }
    }

    pub async fn restore_entry(&mut self, entry_id: &str) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return false;
        }
        let name = self.entry_name(entry_id);
        match self.mutations.restore(entry_id).await {
            Ok(()) => {
                self.info(&format!("Restored \"{}\"", name));
                self.reload_trash().await;
                true
            }
            Err(e) => {
                self.fail(&format!("Failed to restore \"{}\"", name), &e);
                false
            }
        }
    }

    pub async fn delete_forever(&mut self, entry_id: &str) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return false;
        }
        let name = self.entry_name(entry_id);
        let confirm = self.confirm.clone();
        match self
            .mutations
            .permanently_delete(entry_id, &name, confirm.as_ref())
            .await
        {
            Ok(DeleteOutcome::Deleted) => {
                self.info(&format!("Permanently deleted \"{}\"", name));
                self.reload_trash().await;
                true
            }
            Ok(DeleteOutcome::Declined) => false,
            Err(e) => {
                self.fail(&format!("Failed to permanently delete \"{}\"", name), &e);
                false
            }
        }
    }

    async fn reload_trash(&mut self) {
        if self.view != ViewKind::Trash {
            return;
        }
        match self.listing.list_trashed().await {
            Ok(entries) => self.show(&entries, ViewKind::Trash),
            Err(e) => self.fail("Failed to load trash", &e),
        }
    }

    pub async fn rename_entry(&mut self, entry_id: &str, new_name: &str) -> bool {
        let _busy = BusyGuard::new(&self.busy);
        let new_name = new_name.trim();
        if new_name.is_empty() {
            self.info("A name is required");
            return false;
        }
        if !self.authorized().await {
            return false;
        }
        let patch = MetadataPatch {
            name: Some(new_name.to_string()),
            ..Default::default()
        };
        match self.mutations.update_metadata(entry_id, &patch).await {
            Ok(()) => {
                self.info(&format!("Renamed to \"{}\"", new_name));
                if self.view == ViewKind::Folder {
                    self.load_current().await;
                }
                true
            }
            Err(e) => {
                self.fail("Failed to rename", &e);
                false
            }
        }
    }

    // ============ Sync ============

    pub async fn sync_backend(&mut self) -> Option<SyncReport> {
        let _busy = BusyGuard::new(&self.busy);
        if !self.authorized().await {
            return None;
        }
        match self.sync.run(&self.listing).await {
            Ok(report) => {
                if report.is_clean() {
                    self.info("All files uploaded to backend.");
                } else {
                    self.notifier.notify(
                        NoticeLevel::Error,
                        &format!(
                            "Backend sync incomplete: {} failed, {} skipped",
                            report.failed.len(),
                            report.skipped.len()
                        ),
                    );
                }
                Some(report)
            }
            Err(e) => {
                self.fail("Error fetching files", &e);
                None
            }
        }
    }
}
