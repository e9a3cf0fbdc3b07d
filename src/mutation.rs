//! Mutation client: trash, restore, permanent delete and metadata updates.

use std::sync::Arc;
use tracing::info;

use crate::providers::{DriveApi, MetadataPatch, ProviderError};

/// Asks the user a yes/no question before an irreversible action
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The user declined; nothing was sent
    Declined,
}

pub fn permanent_delete_prompt(name: &str) -> String {
    format!(
        "Are you sure you want to permanently delete \"{}\"? This cannot be undone.",
        name
    )
}

pub struct MutationClient {
    api: Arc<dyn DriveApi>,
}

impl MutationClient {
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self { api }
    }

    pub async fn trash(&self, entry_id: &str) -> Result<(), ProviderError> {
        self.api
            .update_metadata(entry_id, &MetadataPatch::trashed(true))
            .await?;
        info!("Moved {} to trash", entry_id);
        Ok(())
    }

    pub async fn restore(&self, entry_id: &str) -> Result<(), ProviderError> {
        self.api
            .update_metadata(entry_id, &MetadataPatch::trashed(false))
            .await?;
        info!("Restored {} from trash", entry_id);
        Ok(())
    }

    /// Irreversibly delete an entry once the user confirms
    pub async fn permanently_delete(
        &self,
        entry_id: &str,
        name: &str,
        confirm: &dyn Confirm,
    ) -> Result<DeleteOutcome, ProviderError> {
        if !confirm.confirm(&permanent_delete_prompt(name)) {
            return Ok(DeleteOutcome::Declined);
        }
        self.api.delete_file(entry_id).await?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Send only the fields set on `patch`
    pub async fn update_metadata(
        &self,
        entry_id: &str,
        patch: &MetadataPatch,
    ) -> Result<(), ProviderError> {
        if patch.is_empty() {
            return Err(ProviderError::Other("Nothing to update".to_string()));
        }
        self.api.update_metadata(entry_id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::{Call, FakeDrive};
    use crate::providers::Entry;
    use std::sync::Mutex;

    struct Answer(bool, Mutex<Vec<String>>);

    impl Confirm for Answer {
        fn confirm(&self, prompt: &str) -> bool {
            self.1.lock().unwrap().push(prompt.to_string());
            self.0
        }
    }

    fn setup() -> (Arc<FakeDrive>, MutationClient) {
        let fake = Arc::new(FakeDrive::with_entries(vec![Entry::new(
            "d1",
            "q1.pdf",
            "application/pdf",
        )]));
        let client = MutationClient::new(fake.clone());
        (fake, client)
    }

    #[tokio::test]
    async fn test_trash_and_restore() {
        let (fake, client) = setup();
        client.trash("d1").await.unwrap();
        assert!(fake.entry("d1").unwrap().trashed);
        client.restore("d1").await.unwrap();
        assert!(!fake.entry("d1").unwrap().trashed);
    }

    #[tokio::test]
    async fn test_declined_delete_sends_nothing() {
        let (fake, client) = setup();
        let answer = Answer(false, Mutex::new(Vec::new()));
        let outcome = client.permanently_delete("d1", "q1.pdf", &answer).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Declined);
        assert!(fake.calls().is_empty());
        assert_eq!(
            answer.1.lock().unwrap()[0],
            "Are you sure you want to permanently delete \"q1.pdf\"? This cannot be undone."
        );
    }

    #[tokio::test]
    async fn test_confirmed_delete() {
        let (fake, client) = setup();
        let answer = Answer(true, Mutex::new(Vec::new()));
        let outcome = client.permanently_delete("d1", "q1.pdf", &answer).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(fake.calls(), vec![Call::Delete("d1".to_string())]);
        assert!(fake.entry("d1").is_none());
    }

    #[tokio::test]
    async fn test_update_metadata_sends_only_set_fields() {
        let (fake, client) = setup();
        let patch = MetadataPatch {
            name: Some("q1-final.pdf".to_string()),
            ..Default::default()
        };
        client.update_metadata("d1", &patch).await.unwrap();
        assert_eq!(fake.entry("d1").unwrap().name, "q1-final.pdf");

        assert!(client.update_metadata("d1", &MetadataPatch::default()).await.is_err());
        assert_eq!(fake.calls().len(), 1);
    }
}
