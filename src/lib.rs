// DocuDesk - Document management client for Google Drive
// Session, listing, transfers, trash and backend sync behind one state object

pub mod config;
pub mod credential_store;
pub mod listing;
pub mod mutation;
pub mod navigation;
pub mod providers;
pub mod session;
pub mod sync;
pub mod transfer;
pub mod view;
pub mod workspace;

pub use config::AppConfig;
pub use providers::{DriveApi, Entry, ErrorKind, ProviderError};
pub use workspace::{Confirm, NoticeLevel, Notifier, Services, Workspace};

/// Versions of key dependencies, resolved at build time
pub fn build_info() -> Vec<(&'static str, &'static str)> {
    vec![
        ("docudesk", env!("CARGO_PKG_VERSION")),
        ("rustc", env!("RUSTC_VERSION")),
        ("tokio", env!("DEP_VERSION_TOKIO")),
        ("reqwest", env!("DEP_VERSION_REQWEST")),
        ("oauth2", env!("DEP_VERSION_OAUTH2")),
        ("serde", env!("DEP_VERSION_SERDE")),
    ]
}
