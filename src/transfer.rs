//! Transfer manager
//!
//! Uploads run strictly one at a time in submission order. `cancel()` aborts
//! the in-flight upload and drops everything still queued. Downloads go to a
//! `.part` file first and are renamed into place once complete.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::providers::{DriveApi, ProviderError, TransferProgress, UploadRequest, UploadedFile};
use crate::view::UploadCard;

/// Observer for upload progress: (transfer id, progress)
pub type TransferObserver = Arc<dyn Fn(&str, TransferProgress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum TransferStatus {
    Ready,
    Uploading(u8),
    Completed,
    Failed(String),
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Ready => write!(f, "Ready to upload"),
            TransferStatus::Uploading(percent) => write!(f, "Uploading... {}%", percent),
            TransferStatus::Completed => write!(f, "Completed"),
            TransferStatus::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// A selected local file waiting to be uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransfer {
    pub id: String,
    pub local_path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub status: TransferStatus,
}

impl PendingTransfer {
    pub fn card(&self) -> UploadCard {
        UploadCard::new(&self.name, self.size, self.status.to_string())
    }
}

/// An upload the provider acknowledged
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTransfer {
    pub name: String,
    pub remote_id: String,
}

pub struct TransferManager {
    api: Arc<dyn DriveApi>,
    queue: Arc<Mutex<VecDeque<PendingTransfer>>>,
    cancel_token: Mutex<CancellationToken>,
    /// Held for the whole of `upload_all`
    active: tokio::sync::Mutex<()>,
}

impl TransferManager {
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            api,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            cancel_token: Mutex::new(CancellationToken::new()),
            active: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<PendingTransfer>> {
        lock(&self.queue)
    }

    /// Add a local file to the end of the queue
    pub async fn enqueue(&self, path: &Path) -> Result<PendingTransfer, ProviderError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(ProviderError::Other(format!("{} is not a file", path.display())));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ProviderError::Other(format!("{} has no file name", path.display())))?;

        let transfer = PendingTransfer {
            id: uuid::Uuid::new_v4().to_string(),
            local_path: path.to_path_buf(),
            mime_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            name,
            size: metadata.len(),
            status: TransferStatus::Ready,
        };

        self.lock_queue().push_back(transfer.clone());
        Ok(transfer)
    }

    /// Add several files, stopping at the first one that cannot be read
    pub async fn enqueue_many(&self, paths: &[PathBuf]) -> Result<Vec<PendingTransfer>, ProviderError> {
        let mut added = Vec::with_capacity(paths.len());
        for path in paths {
            added.push(self.enqueue(path).await?);
        }
        Ok(added)
    }

    /// Drop a queued item that has not started yet
    pub fn remove(&self, transfer_id: &str) -> bool {
        let mut queue = self.lock_queue();
        let Some(index) = queue.iter().position(|t| t.id == transfer_id) else {
            return false;
        };
        if matches!(queue[index].status, TransferStatus::Uploading(_)) {
            return false;
        }
        queue.remove(index);
        true
    }

    pub fn pending(&self) -> Vec<PendingTransfer> {
        self.lock_queue().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    /// Upload every queued file into `target_container_id`.
    ///
    /// Items are taken from the head of the queue one at a time. A failed
    /// item stays at the head, so a later call resumes from it. A call made
    /// while another one is running is rejected with `UploadInProgress`.
    pub async fn upload_all(
        &self,
        target_container_id: &str,
        observer: Option<TransferObserver>,
    ) -> Result<Vec<CompletedTransfer>, ProviderError> {
        let Ok(_active) = self.active.try_lock() else {
            warn!("Upload requested while another batch is running");
            return Err(ProviderError::UploadInProgress);
        };
        let token = lock(&self.cancel_token).clone();
        let mut completed = Vec::new();

        loop {
            if token.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let Some(current) = self.start_next() else { break };

            let request = UploadRequest {
                local_path: current.local_path.clone(),
                name: current.name.clone(),
                mime_type: current.mime_type.clone(),
                parent_id: target_container_id.to_string(),
                size: current.size,
            };

            let queue = self.queue.clone();
            let transfer_id = current.id.clone();
            let observer = observer.clone();
            let on_progress = Arc::new(move |sent: u64, total: u64| {
                let progress = TransferProgress::new(sent, total);
                set_status(&queue, &transfer_id, TransferStatus::Uploading(progress.percent));
                if let Some(ref observer) = observer {
                    observer(&transfer_id, progress);
                }
            });

            match self.api.upload_file(&request, on_progress, token.clone()).await {
                Ok(UploadedFile { id }) => {
                    self.finish(&current.id);
                    completed.push(CompletedTransfer {
                        name: current.name,
                        remote_id: id,
                    });
                }
                Err(ProviderError::Cancelled) => {
                    info!("Upload of {} cancelled", current.name);
                    return Err(ProviderError::Cancelled);
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", current.name, e);
                    set_status(&self.queue, &current.id, TransferStatus::Failed(e.to_string()));
                    return Err(e);
                }
            }
        }

        Ok(completed)
    }

    /// Mark the head item as started and return a copy of it
    fn start_next(&self) -> Option<PendingTransfer> {
        let mut queue = self.lock_queue();
        let head = queue.front_mut()?;
        head.status = TransferStatus::Uploading(0);
        Some(head.clone())
    }

    fn finish(&self, transfer_id: &str) {
        let mut queue = self.lock_queue();
        if queue.front().is_some_and(|t| t.id == transfer_id) {
            queue.pop_front();
        }
    }

    /// Abort the in-flight upload and discard every queued item
    pub fn cancel(&self) {
        let mut token = lock(&self.cancel_token);
        token.cancel();
        *token = CancellationToken::new();
        let dropped = {
            let mut queue = self.lock_queue();
            let n = queue.len();
            queue.clear();
            n
        };
        info!("Transfers cancelled, {} queued item(s) dropped", dropped);
    }

    /// Download an entry's bytes into `dest_dir`.
    ///
    /// The file is written next to its destination with a `.part` suffix and
    /// renamed once complete; a clashing name gets a ` (n)` suffix.
    pub async fn download(
        &self,
        entry_id: &str,
        suggested_name: &str,
        content_type: Option<&str>,
        dest_dir: &Path,
    ) -> Result<PathBuf, ProviderError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let file_name = download_file_name(suggested_name, content_type);
        let part = PartFile::new(dest_dir.join(format!("{}.{}.part", file_name, &entry_id_suffix(entry_id))));

        let mut file = tokio::fs::File::create(part.path()).await?;
        let written = self.api.download_file(entry_id, &mut file).await?;
        file.sync_all().await?;
        drop(file);
        debug!("Wrote {} bytes for {}", written, entry_id);

        let destination = unique_destination(dest_dir, &file_name);
        tokio::fs::rename(part.path(), &destination).await?;
        part.keep();

        info!("Downloaded {} to {:?}", entry_id, destination);
        Ok(destination)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_status(queue: &Mutex<VecDeque<PendingTransfer>>, transfer_id: &str, status: TransferStatus) {
    if let Some(item) = lock(queue).iter_mut().find(|t| t.id == transfer_id) {
        item.status = status;
    }
}

fn entry_id_suffix(entry_id: &str) -> String {
    entry_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect()
}

/// Temporary download file, removed on drop unless kept
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Strip path separators and add an extension from the content type when
/// the name has none.
fn download_file_name(suggested: &str, content_type: Option<&str>) -> String {
    let mut name: String = suggested
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    if name.is_empty() || name == "." || name == ".." {
        name = "download".to_string();
    }

    if Path::new(&name).extension().is_none() {
        let ext = content_type
            .and_then(mime_guess::get_mime_extensions_str)
            .and_then(|exts| exts.first());
        if let Some(ext) = ext {
            name = format!("{}.{}", name, ext);
        }
    }
    name
}

/// First free path for `name` in `dir`: `name`, then `stem (1).ext`, ...
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| match ext {
            Some(ref ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::{Call, FakeDrive};

    fn write_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, name.as_bytes()).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_guesses_mime_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(Arc::new(FakeDrive::new()));
        let paths = write_files(dir.path(), &["report.pdf"]);

        let item = manager.enqueue(&paths[0]).await.unwrap();
        assert_eq!(item.mime_type, "application/pdf");
        assert_eq!(item.size, "report.pdf".len() as u64);
        assert_eq!(item.card().status, "Ready to upload");

        assert!(manager.enqueue(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_uploads_run_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        let manager = TransferManager::new(fake.clone());
        manager
            .enqueue_many(&write_files(dir.path(), &["c.txt", "a.txt", "b.txt"]))
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: TransferObserver =
            Arc::new(move |_: &str, p: TransferProgress| sink.lock().unwrap().push(p.percent));

        let done = manager.upload_all("root", Some(observer)).await.unwrap();
        let names: Vec<_> = done.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["c.txt", "a.txt", "b.txt"]);
        assert_eq!(fake.uploaded_names(), vec!["c.txt", "a.txt", "b.txt"]);
        assert!(manager.is_empty());
        assert_eq!(seen.lock().unwrap().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_cancel_drops_remaining_without_calls() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        let manager = Arc::new(TransferManager::new(fake.clone()));
        manager
            .enqueue_many(&write_files(dir.path(), &["1.txt", "2.txt", "3.txt", "4.txt"]))
            .await
            .unwrap();

        // cancel while the second upload is in flight
        let handle = manager.clone();
        fake.on_upload(move |req| {
            if req.name == "2.txt" {
                handle.cancel();
            }
        });

        let err = manager.upload_all("root", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(fake.uploaded_names(), vec!["1.txt", "2.txt"]);
        assert!(manager.is_empty());

        // the manager is usable again afterwards
        manager.enqueue(&dir.path().join("3.txt")).await.unwrap();
        manager.upload_all("root", None).await.unwrap();
        assert_eq!(fake.uploaded_names(), vec!["1.txt", "2.txt", "3.txt"]);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_upload() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        fake.hang_uploads();
        let manager = Arc::new(TransferManager::new(fake.clone()));
        manager
            .enqueue_many(&write_files(dir.path(), &["big.bin", "next.bin"]))
            .await
            .unwrap();

        let runner = manager.clone();
        let task = tokio::spawn(async move { runner.upload_all("root", None).await });
        while fake.uploaded_names().is_empty() {
            tokio::task::yield_now().await;
        }
        manager.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(fake.uploaded_names(), vec!["big.bin"]);
    }

    #[tokio::test]
    async fn test_second_batch_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        fake.hang_uploads();
        let manager = Arc::new(TransferManager::new(fake.clone()));
        manager
            .enqueue_many(&write_files(dir.path(), &["a.txt", "b.txt"]))
            .await
            .unwrap();

        let runner = manager.clone();
        let task = tokio::spawn(async move { runner.upload_all("root", None).await });
        while fake.uploaded_names().is_empty() {
            tokio::task::yield_now().await;
        }

        let err = manager.upload_all("root", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::UploadInProgress));
        assert_eq!(fake.uploaded_names(), vec!["a.txt"]);

        manager.cancel();
        assert!(matches!(task.await.unwrap(), Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn test_failure_keeps_queue_at_failed_item() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        fake.fail_upload_of("b.txt");
        let manager = TransferManager::new(fake.clone());
        manager
            .enqueue_many(&write_files(dir.path(), &["a.txt", "b.txt", "c.txt"]))
            .await
            .unwrap();

        let err = manager.upload_all("root", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServerError { status: 500, .. }));

        let pending = manager.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].name, "b.txt");
        assert!(matches!(pending[0].status, TransferStatus::Failed(_)));
        assert_eq!(fake.uploaded_names(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_remove_pending_item() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        let manager = TransferManager::new(fake.clone());
        let items = manager
            .enqueue_many(&write_files(dir.path(), &["a.txt", "b.txt"]))
            .await
            .unwrap();

        assert!(manager.remove(&items[0].id));
        assert!(!manager.remove("missing"));
        manager.upload_all("root", None).await.unwrap();
        assert_eq!(fake.uploaded_names(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_download_renames_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        fake.set_content("d1", b"pdf bytes");
        let manager = TransferManager::new(fake.clone());

        let first = manager.download("d1", "q1.pdf", Some("application/pdf"), dir.path()).await.unwrap();
        let second = manager.download("d1", "q1.pdf", Some("application/pdf"), dir.path()).await.unwrap();

        assert_eq!(first, dir.path().join("q1.pdf"));
        assert_eq!(second, dir.path().join("q1 (1).pdf"));
        assert_eq!(std::fs::read(&second).unwrap(), b"pdf bytes");
        assert_eq!(fake.calls(), vec![Call::Download("d1".into()), Call::Download("d1".into())]);

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TransferManager::new(Arc::new(FakeDrive::new()));
        let err = manager.download("missing", "x.pdf", None, dir.path()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_download_file_name() {
        assert_eq!(download_file_name("../etc/passwd", None), ".._etc_passwd");
        assert_eq!(download_file_name("", None), "download");
        assert_eq!(download_file_name("q1.pdf", Some("text/plain")), "q1.pdf");
        assert!(download_file_name("notes", Some("text/plain")).starts_with("notes."));
    }
}
