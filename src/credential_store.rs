// DocuDesk Credential Store
// File-backed key/value store for session credentials, owner-only permissions

use rand::RngCore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const APP_DIR: &str = "docudesk";
const STORE_FILENAME: &str = "credentials.json";

/// Fixed key the access credential is persisted under
pub const ACCESS_TOKEN_KEY: &str = "google_access_token";

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Credential not found: {0}")]
    NotFound(String),
    #[error("No config directory available")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ============ Credential Store ============

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store in the per-user config directory
    pub fn default_location() -> Result<Self, CredentialError> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or(CredentialError::NoConfigDir)?;
        Ok(Self::at(base.join(APP_DIR).join(STORE_FILENAME)))
    }

    /// Store backed by an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store a credential
    pub fn store(&self, account: &str, secret: &str) -> Result<(), CredentialError> {
        let mut entries = self.read_entries()?;
        entries.insert(account.to_string(), secret.to_string());
        self.write_entries(&entries)?;
        info!("Credential stored: {}", account);
        Ok(())
    }

    /// Retrieve a credential
    pub fn get(&self, account: &str) -> Result<String, CredentialError> {
        self.read_entries()?
            .remove(account)
            .ok_or_else(|| CredentialError::NotFound(account.to_string()))
    }

    /// Delete a credential; the backing file is securely removed once empty
    /// or when it can no longer be parsed
    pub fn delete(&self, account: &str) -> Result<(), CredentialError> {
        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(CredentialError::Serialization(e)) => {
                warn!("Discarding unreadable credential store: {}", e);
                return self.discard();
            }
            Err(e) => return Err(e),
        };
        if entries.remove(account).is_none() {
            return Ok(());
        }
        if entries.is_empty() {
            secure_delete(&self.path)?;
        } else {
            self.write_entries(&entries)?;
        }
        info!("Credential deleted: {}", account);
        Ok(())
    }

    /// Securely remove the whole backing file
    pub fn discard(&self) -> Result<(), CredentialError> {
        secure_delete(&self.path)
    }

    // ============ Internal Helpers ============

    fn read_entries(&self) -> Result<HashMap<String, String>, CredentialError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let data = std::fs::read(&self.path)?;
        serde_json::from_slice(&data).map_err(|e| CredentialError::Serialization(e.to_string()))
    }

    fn write_entries(&self, entries: &HashMap<String, String>) -> Result<(), CredentialError> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                ensure_secure_permissions(dir)?;
            }
        }
        let data = serde_json::to_vec_pretty(entries)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, &data)?;
        ensure_secure_permissions(&self.path)?;
        Ok(())
    }
}

// ============ Permission Hardening ============

/// Ensure secure file/directory permissions (0o600 files, 0o700 dirs on Unix)
pub fn ensure_secure_permissions(path: &Path) -> Result<(), CredentialError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if path.is_dir() { 0o700 } else { 0o600 };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Securely delete a file (overwrite with zeros, then random data, then remove)
pub fn secure_delete(path: &Path) -> Result<(), CredentialError> {
    if path.exists() {
        let size = std::fs::metadata(path)?.len() as usize;
        if size > 0 {
            std::fs::write(path, vec![0u8; size])?;
            let mut random = vec![0u8; size];
            rand::thread_rng().fill_bytes(&mut random);
            std::fs::write(path, &random)?;
        }
        std::fs::remove_file(path)?;
        info!("Securely deleted: {:?}", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("nested").join(STORE_FILENAME));

        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(CredentialError::NotFound(_))));

        store.store(ACCESS_TOKEN_KEY, "tok").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), "tok");

        store.delete(ACCESS_TOKEN_KEY).unwrap();
        assert!(!store.path().exists());
        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(CredentialError::NotFound(_))));
    }

    #[test]
    fn test_delete_keeps_other_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join(STORE_FILENAME));
        store.store("a", "1").unwrap();
        store.store("b", "2").unwrap();
        store.delete("a").unwrap();
        assert_eq!(store.get("b").unwrap(), "2");
        // deleting a missing key is a no-op
        store.delete("a").unwrap();
    }

    #[test]
    fn test_delete_discards_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join(STORE_FILENAME));
        std::fs::write(store.path(), "{ truncated").unwrap();

        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(CredentialError::Serialization(_))));
        store.delete(ACCESS_TOKEN_KEY).unwrap();
        assert!(!store.path().exists());

        store.store(ACCESS_TOKEN_KEY, "tok").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), "tok");
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join(STORE_FILENAME));
        store.store(ACCESS_TOKEN_KEY, "tok").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
