//! Auth session manager
//!
//! Owns the access credential lifecycle: acquisition through the identity
//! provider, persistence in the credential store, validation against the
//! userinfo endpoint, and logout.

use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

use crate::credential_store::{CredentialError, CredentialStore, ACCESS_TOKEN_KEY};
use crate::providers::{DriveApi, OAuth2Manager, ProviderError, StoredTokens, UserInfo};

/// Display name shown when no one is signed in
pub const GUEST_NAME: &str = "Guest";
/// Avatar text shown when no one is signed in
pub const GUEST_INITIALS: &str = "--";

/// How much interaction an authorization attempt may require
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Reuse or refresh a cached credential without user interaction
    Silent,
    /// Show the consent screen
    Interactive,
}

/// Obtains tokens from the identity provider.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        mode: PromptMode,
        cached: Option<&StoredTokens>,
    ) -> Result<StoredTokens, ProviderError>;
}

#[async_trait]
impl Authorizer for OAuth2Manager {
    async fn authorize(
        &self,
        mode: PromptMode,
        cached: Option<&StoredTokens>,
    ) -> Result<StoredTokens, ProviderError> {
        match mode {
            PromptMode::Silent => match cached {
                Some(tokens) if !tokens.is_expired() => Ok(tokens.clone()),
                Some(StoredTokens {
                    refresh_token: Some(refresh),
                    ..
                }) => self.refresh_tokens(refresh).await,
                _ => Err(ProviderError::AuthenticationFailed(
                    "interaction required".to_string(),
                )),
            },
            PromptMode::Interactive => self.browser_flow().await,
        }
    }
}

/// An authorized user session
#[derive(Debug, Clone)]
pub struct Session {
    access_token: SecretString,
    pub user: UserInfo,
    pub display_name: String,
    pub initials: String,
}

impl Session {
    fn new(access_token: SecretString, user: UserInfo) -> Self {
        let display_name = user
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "User".to_string());
        let initials = initials_for(&user, &display_name);
        Self {
            access_token,
            user,
            display_name,
            initials,
        }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }
}

/// Up to two upper-cased letters: given + family name when known, else the
/// leading letters of the display name's words.
pub fn initials_for(user: &UserInfo, display_name: &str) -> String {
    let first = |s: &Option<String>| s.as_deref().and_then(|v| v.trim().chars().next());
    let from_parts: String = [first(&user.given_name), first(&user.family_name)]
        .into_iter()
        .flatten()
        .collect();

    let raw = if from_parts.is_empty() {
        display_name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .collect()
    } else {
        from_parts
    };
    raw.to_uppercase().chars().take(2).collect()
}

fn store_error(e: CredentialError) -> ProviderError {
    ProviderError::Other(format!("Credential store: {}", e))
}

pub struct SessionManager {
    api: Arc<dyn DriveApi>,
    authorizer: Arc<dyn Authorizer>,
    store: CredentialStore,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn DriveApi>, authorizer: Arc<dyn Authorizer>, store: CredentialStore) -> Self {
        Self {
            api,
            authorizer,
            store,
            session: None,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn display_name(&self) -> &str {
        self.session.as_ref().map(|s| s.display_name.as_str()).unwrap_or(GUEST_NAME)
    }

    pub fn initials(&self) -> &str {
        self.session.as_ref().map(|s| s.initials.as_str()).unwrap_or(GUEST_INITIALS)
    }

    /// Persisted tokens, if any. Entries holding a bare token string are
    /// accepted as well. An unreadable store counts as an invalid
    /// credential and is removed.
    fn cached_tokens(&self) -> Result<Option<StoredTokens>, ProviderError> {
        match self.store.get(ACCESS_TOKEN_KEY) {
            Ok(raw) => Ok(Some(
                serde_json::from_str(&raw).unwrap_or_else(|_| StoredTokens::bearer(raw.trim())),
            )),
            Err(CredentialError::NotFound(_)) => Ok(None),
            Err(CredentialError::Serialization(e)) => {
                warn!("Credential store unreadable, discarding: {}", e);
                self.store.discard().map_err(store_error)?;
                Ok(None)
            }
            Err(e) => Err(store_error(e)),
        }
    }

    fn persist(&self, tokens: &StoredTokens) -> Result<(), ProviderError> {
        let raw = serde_json::to_string(tokens).map_err(|e| ProviderError::Other(e.to_string()))?;
        self.store.store(ACCESS_TOKEN_KEY, &raw).map_err(store_error)
    }

    /// Obtain a valid credential, prompting the user when required.
    ///
    /// `Silent` is tried first when a cached credential exists and falls
    /// back to `Interactive` if it fails. Provider error payloads are
    /// returned as-is; nothing is retried.
    pub async fn ensure_authorized(&mut self, mode: PromptMode) -> Result<&Session, ProviderError> {
        let cached = self.cached_tokens()?;

        let tokens = match (mode, cached.as_ref()) {
            (PromptMode::Silent, Some(cached)) => {
                match self.authorizer.authorize(PromptMode::Silent, Some(cached)).await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        warn!("Silent authorization failed ({}), prompting", e);
                        self.authorizer.authorize(PromptMode::Interactive, Some(cached)).await?
                    }
                }
            }
            (_, cached) => self.authorizer.authorize(PromptMode::Interactive, cached).await?,
        };

        self.activate(&tokens).await?;
        self.commit(&tokens)
    }

    /// Install tokens on the API client and fetch the user's identity.
    /// The token is uninstalled again when the identity check fails.
    async fn activate(&mut self, tokens: &StoredTokens) -> Result<(), ProviderError> {
        let secret = SecretString::from(tokens.access_token.clone());
        self.api.set_access_token(Some(secret.clone()));
        let user = match self.api.user_info().await {
            Ok(user) => user,
            Err(e) => {
                self.api.set_access_token(None);
                self.session = None;
                return Err(e);
            }
        };
        let session = Session::new(secret, user);
        info!("Signed in as {}", session.display_name);
        self.session = Some(session);
        Ok(())
    }

    /// Persist tokens of an activated session; a failed write signs out
    fn commit(&mut self, tokens: &StoredTokens) -> Result<&Session, ProviderError> {
        if let Err(e) = self.persist(tokens) {
            self.api.set_access_token(None);
            self.session = None;
            return Err(e);
        }
        self.session
            .as_ref()
            .ok_or_else(|| ProviderError::Other("no active session".to_string()))
    }

    /// Re-validate a persisted credential at startup.
    ///
    /// Returns `Ok(None)` when there is nothing to restore or the stored
    /// credential no longer works; an unusable credential is removed.
    pub async fn restore_session(&mut self) -> Result<Option<&Session>, ProviderError> {
        let Some(mut tokens) = self.cached_tokens()? else {
            return Ok(None);
        };

        let mut refreshed = false;
        if tokens.is_expired() {
            match self.authorizer.authorize(PromptMode::Silent, Some(&tokens)).await {
                Ok(fresh) => {
                    tokens = fresh;
                    refreshed = true;
                }
                Err(e) => {
                    warn!("Stored credential expired and could not be refreshed: {}", e);
                    self.clear_credentials()?;
                    return Ok(None);
                }
            }
        }

        if let Err(e) = self.activate(&tokens).await {
            warn!("Stored credential rejected: {}", e);
            self.clear_credentials()?;
            return Ok(None);
        }
        if refreshed {
            self.commit(&tokens)?;
        }
        Ok(self.session.as_ref())
    }

    /// Forget the credential locally and on the API client
    pub fn logout(&mut self) -> Result<(), ProviderError> {
        self.clear_credentials()?;
        info!("Signed out");
        Ok(())
    }

    fn clear_credentials(&mut self) -> Result<(), ProviderError> {
        self.api.set_access_token(None);
        self.session = None;
        self.store.delete(ACCESS_TOKEN_KEY).map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::{Call, FakeDrive};
    use std::sync::Mutex;

    /// Scripted authorizer recording the modes it was asked for
    struct ScriptedAuthorizer {
        silent: Option<String>,
        interactive: Option<String>,
        modes: Mutex<Vec<PromptMode>>,
    }

    impl ScriptedAuthorizer {
        fn new(silent: Option<&str>, interactive: Option<&str>) -> Self {
            Self {
                silent: silent.map(str::to_string),
                interactive: interactive.map(str::to_string),
                modes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Authorizer for ScriptedAuthorizer {
        async fn authorize(
            &self,
            mode: PromptMode,
            _cached: Option<&StoredTokens>,
        ) -> Result<StoredTokens, ProviderError> {
            self.modes.lock().unwrap().push(mode);
            let token = match mode {
                PromptMode::Silent => &self.silent,
                PromptMode::Interactive => &self.interactive,
            };
            token
                .as_deref()
                .map(StoredTokens::bearer)
                .ok_or_else(|| ProviderError::AuthenticationFailed("access_denied".to_string()))
        }
    }

    fn user(name: &str) -> UserInfo {
        UserInfo {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn setup(
        auth: ScriptedAuthorizer,
    ) -> (tempfile::TempDir, Arc<FakeDrive>, Arc<ScriptedAuthorizer>, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDrive::new());
        let auth = Arc::new(auth);
        let manager = SessionManager::new(
            fake.clone(),
            auth.clone(),
            CredentialStore::at(dir.path().join("credentials.json")),
        );
        (dir, fake, auth, manager)
    }

    #[test]
    fn test_initials() {
        let full = UserInfo {
            name: Some("Ada Lovelace".to_string()),
            given_name: Some("ada".to_string()),
            family_name: Some("lovelace".to_string()),
            email: None,
        };
        assert_eq!(initials_for(&full, "Ada Lovelace"), "AL");
        assert_eq!(initials_for(&user("grace brewster hopper"), "grace brewster hopper"), "GB");
        assert_eq!(initials_for(&UserInfo::default(), "User"), "U");
    }

    #[tokio::test]
    async fn test_interactive_forced_without_cache() {
        let (_dir, fake, auth, mut manager) = setup(ScriptedAuthorizer::new(Some("s"), Some("i")));
        fake.set_user(Some(user("Ada Lovelace")));

        let session = manager.ensure_authorized(PromptMode::Silent).await.unwrap();
        assert_eq!(session.display_name, "Ada Lovelace");
        assert_eq!(session.initials, "AL");
        assert_eq!(*auth.modes.lock().unwrap(), vec![PromptMode::Interactive]);
        assert!(manager.cached_tokens().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_silent_failure_falls_back_to_interactive() {
        let (_dir, fake, auth, mut manager) = setup(ScriptedAuthorizer::new(None, Some("i")));
        fake.set_user(Some(user("Ada")));
        manager.persist(&StoredTokens::bearer("old")).unwrap();

        manager.ensure_authorized(PromptMode::Silent).await.unwrap();
        assert_eq!(
            *auth.modes.lock().unwrap(),
            vec![PromptMode::Silent, PromptMode::Interactive]
        );
        assert_eq!(manager.cached_tokens().unwrap().unwrap().access_token, "i");
    }

    #[tokio::test]
    async fn test_error_payload_is_propagated() {
        let (_dir, _fake, auth, mut manager) = setup(ScriptedAuthorizer::new(None, None));
        let err = manager.ensure_authorized(PromptMode::Interactive).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(auth.modes.lock().unwrap().len(), 1);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_restore_without_cache() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, None));
        assert!(manager.restore_session().await.unwrap().is_none());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, None));
        fake.set_user(Some(user("Ada Lovelace")));
        manager.store.store(ACCESS_TOKEN_KEY, "plain-token").unwrap();

        let restored = manager.restore_session().await.unwrap().unwrap();
        assert_eq!(restored.initials, "AL");
        assert!(fake.has_access_token());
        assert_eq!(fake.calls(), vec![Call::UserInfo]);
    }

    #[tokio::test]
    async fn test_restore_rejected_credential_is_cleared() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, None));
        fake.set_user(None); // userinfo answers 401
        manager.persist(&StoredTokens::bearer("stale")).unwrap();

        assert!(manager.restore_session().await.unwrap().is_none());
        assert!(manager.cached_tokens().unwrap().is_none());
        assert!(!fake.has_access_token());
    }

    fn expired(token: &str, refresh: Option<&str>) -> StoredTokens {
        StoredTokens {
            refresh_token: refresh.map(str::to_string),
            expires_at: Some(chrono::Utc::now().timestamp() - 60),
            ..StoredTokens::bearer(token)
        }
    }

    #[tokio::test]
    async fn test_rejected_identity_leaves_nothing_behind() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, Some("fresh")));
        fake.set_user(None); // userinfo answers 401

        let err = manager.ensure_authorized(PromptMode::Interactive).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServerError { status: 401, .. }));
        assert!(manager.current().is_none());
        assert!(!fake.has_access_token());
        assert!(manager.cached_tokens().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_identity_keeps_previous_credential_untouched() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(Some("new"), None));
        fake.set_user(None);
        manager.persist(&StoredTokens::bearer("old")).unwrap();

        assert!(manager.ensure_authorized(PromptMode::Silent).await.is_err());
        assert!(!fake.has_access_token());
        assert_eq!(manager.cached_tokens().unwrap().unwrap().access_token, "old");
    }

    #[tokio::test]
    async fn test_corrupt_store_is_discarded() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, Some("i")));
        fake.set_user(Some(user("Ada")));
        std::fs::write(manager.store.path(), "{ truncated").unwrap();

        assert!(manager.restore_session().await.unwrap().is_none());
        assert!(!manager.store.path().exists());

        std::fs::write(manager.store.path(), "{ truncated").unwrap();
        let session = manager.ensure_authorized(PromptMode::Interactive).await.unwrap();
        assert_eq!(session.display_name, "Ada");
        assert_eq!(manager.cached_tokens().unwrap().unwrap().access_token, "i");

        std::fs::write(manager.store.path(), "{ truncated").unwrap();
        manager.logout().unwrap();
        assert!(!manager.store.path().exists());
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_restore_refreshes_expired_token() {
        let (_dir, fake, auth, mut manager) = setup(ScriptedAuthorizer::new(Some("refreshed"), None));
        fake.set_user(Some(user("Ada Lovelace")));
        manager.persist(&expired("stale", Some("r1"))).unwrap();

        let restored = manager.restore_session().await.unwrap().unwrap();
        assert_eq!(restored.display_name, "Ada Lovelace");
        assert_eq!(*auth.modes.lock().unwrap(), vec![PromptMode::Silent]);
        assert_eq!(manager.cached_tokens().unwrap().unwrap().access_token, "refreshed");
        assert!(fake.has_access_token());
    }

    #[tokio::test]
    async fn test_restore_clears_when_refresh_fails() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, None));
        fake.set_user(Some(user("Ada")));
        manager.persist(&expired("stale", Some("r1"))).unwrap();

        assert!(manager.restore_session().await.unwrap().is_none());
        assert!(manager.cached_tokens().unwrap().is_none());
        assert!(!fake.has_access_token());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (_dir, fake, _auth, mut manager) = setup(ScriptedAuthorizer::new(None, Some("i")));
        fake.set_user(Some(user("Ada")));
        manager.ensure_authorized(PromptMode::Interactive).await.unwrap();

        manager.logout().unwrap();
        assert!(manager.current().is_none());
        assert!(!fake.has_access_token());
        assert!(manager.cached_tokens().unwrap().is_none());
        assert_eq!(manager.display_name(), GUEST_NAME);
        assert_eq!(manager.initials(), GUEST_INITIALS);
    }
}
