// DocuDesk Configuration Module
// Persistent application configuration storage

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// OAuth scopes requested from the identity provider
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/userinfo.profile",
];

const DEFAULT_BACKEND_ENDPOINT: &str = "http://localhost:8000/upload-document";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OAuth client id registered with the identity provider
    pub client_id: String,
    /// OAuth client secret (desktop clients may omit it)
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    /// Local ingestion endpoint for the sync pipeline
    pub backend_endpoint: String,
    /// Listing page cap for interactive views
    pub page_size: u32,
    /// Listing page cap for the sync pipeline
    pub sync_page_size: u32,
    /// Where downloads are saved
    pub download_dir: PathBuf,
    /// Owner id stamped on every sync record
    pub owner_id: u64,
    /// Delay before a transient menu hides after the pointer leaves it
    pub menu_hide_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let download_dir = dirs::download_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));

        Self {
            client_id: String::new(),
            client_secret: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            backend_endpoint: DEFAULT_BACKEND_ENDPOINT.to_string(),
            page_size: 100,
            sync_page_size: 1000,
            download_dir,
            owner_id: 1,
            menu_hide_delay_ms: 150,
        }
    }
}

impl AppConfig {
    /// Apply `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET` and `DOCUDESK_BACKEND_URL`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.client_id = id;
        }
        if let Some(secret) = lookup("GOOGLE_CLIENT_SECRET").filter(|v| !v.is_empty()) {
            self.client_secret = Some(secret);
        }
        if let Some(url) = lookup("DOCUDESK_BACKEND_URL").filter(|v| !v.is_empty()) {
            self.backend_endpoint = url;
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("docudesk").join("config.json")
}

/// Load configuration from disk, falling back to defaults
pub fn load_config(path: &Path) -> AppConfig {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config: {}", e);
            }
        }
    }

    AppConfig::default()
}

/// Save configuration to disk
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;

    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.client_id.trim().is_empty() {
        return Err(ConfigError::Missing("client_id"));
    }

    if config.scopes.is_empty() {
        return Err(ConfigError::Missing("scopes"));
    }

    url::Url::parse(&config.backend_endpoint).map_err(|e| ConfigError::Invalid {
        field: "backend_endpoint",
        reason: e.to_string(),
    })?;

    if config.page_size == 0 || config.sync_page_size == 0 {
        return Err(ConfigError::Invalid {
            field: "page_size",
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}
