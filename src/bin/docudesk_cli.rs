//! DocuDesk CLI - Google Drive document manager
//!
//! Usage:
//!   docudesk-cli login                  Sign in through the browser
//!   docudesk-cli ls [folder-id]         List a folder (root by default)
//!   docudesk-cli upload <files>...      Upload into a folder
//!   docudesk-cli download <id>          Save a file locally
//!   docudesk-cli trash-list             Show the trash
//!   docudesk-cli sync                   Mirror metadata to the local backend

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use docudesk::config::{self, AppConfig};
use docudesk::credential_store::CredentialStore;
use docudesk::providers::{
    GoogleDriveConfig, GoogleDriveProvider, OAuth2Manager, TransferProgress,
};
use docudesk::sync::HttpBackend;
use docudesk::transfer::TransferObserver;
use docudesk::view::{MenuKind, PreviewTarget, Rect, ShareAction};
use docudesk::{Confirm, NoticeLevel, Notifier, Services, Workspace};

#[derive(Parser)]
#[command(
    name = "docudesk-cli",
    about = "DocuDesk CLI - Google Drive document manager",
    version
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: <config dir>/docudesk/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer yes to every confirmation
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save OAuth client and backend settings
    Configure {
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        client_secret: Option<String>,
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
    /// Sign in through the browser
    Login,
    /// Forget the stored credential
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List a folder
    Ls {
        /// Folder id (default: root)
        folder: Option<String>,
    },
    /// List the trash
    TrashList,
    /// Search file names from the root
    Search { text: String },
    /// Preview link for a file
    Preview { id: String },
    /// Upload local files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Target folder id (default: root)
        #[arg(long)]
        to: Option<String>,
    },
    /// Download a file
    Download {
        id: String,
        /// Destination directory (default: configured download dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Move a file to the trash
    Trash { id: String },
    /// Restore a file from the trash
    Restore { id: String },
    /// Permanently delete a trashed file
    Rm { id: String },
    /// Rename a file
    Rename { id: String, name: String },
    /// Share link for a file
    Share {
        id: String,
        /// Compose an e-mail instead of printing the direct link
        #[arg(long)]
        mail: bool,
    },
    /// Mirror entry metadata to the local backend
    Sync,
    /// Show build information
    About,
}

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => println!("{}", message),
            NoticeLevel::Error => eprintln!("Error: {}", message),
        }
    }
}

struct ConsoleConfirm {
    assume_yes: bool,
}

impl Confirm for ConsoleConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("{} [y/N] ", prompt);
        let _ = std::io::stdout().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn init_logging(verbose: u8) {
    let level = std::env::var("DOCUDESK_LOG")
        .ok()
        .and_then(|v| v.parse::<tracing::Level>().ok())
        .unwrap_or(match verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        });
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn build_workspace(config: AppConfig, assume_yes: bool) -> Result<Workspace> {
    config::validate_config(&config).context(
        "configuration incomplete; run `docudesk-cli configure --client-id <id>` or set GOOGLE_CLIENT_ID",
    )?;

    let api = Arc::new(GoogleDriveProvider::new(GoogleDriveConfig::default()));
    let authorizer = Arc::new(OAuth2Manager::new(
        &config.client_id,
        config.client_secret.as_deref(),
        &config.scopes,
    ));
    let credentials = CredentialStore::default_location()?;
    let sink = Arc::new(HttpBackend::new(&config.backend_endpoint));

    Ok(Workspace::new(
        config,
        Services {
            api,
            authorizer,
            credentials,
            sink,
            notifier: Arc::new(ConsoleNotifier),
            confirm: Arc::new(ConsoleConfirm { assume_yes }),
        },
    ))
}

/// Restore the stored session, or sign in when there is none
async fn open_session(workspace: &mut Workspace) -> Result<()> {
    if workspace.restore().await || workspace.show_root().await {
        return Ok(());
    }
    bail!("not signed in");
}

fn ensure(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        bail!("{} failed", what)
    }
}

fn print_listing(workspace: &Workspace) {
    let pane = workspace.pane();
    if let Some(message) = pane.message() {
        println!("{}", message);
    } else if pane.cards().is_empty() {
        println!("(empty)");
    } else {
        print!("{}", pane);
    }
}

fn progress_observer(workspace: &Workspace) -> TransferObserver {
    let style = ProgressStyle::with_template("{prefix:<30} [{bar:30}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bars: HashMap<String, ProgressBar> = workspace
        .pending_uploads()
        .into_iter()
        .map(|item| {
            let bar = ProgressBar::new(100).with_style(style.clone());
            bar.set_prefix(item.name.clone());
            (item.id, bar)
        })
        .collect();
    let bars = Arc::new(bars);

    Arc::new(move |transfer_id: &str, progress: TransferProgress| {
        if let Some(bar) = bars.get(transfer_id) {
            bar.set_position(progress.percent as u64);
            if progress.percent >= 100 {
                bar.finish();
            }
        }
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::get_config_path);
    let mut app_config = config::load_config(&config_path);
    app_config.apply_env_overrides();

    match cli.command {
        Commands::About => {
            for (name, version) in docudesk::build_info() {
                println!("{:<10} {}", name, version);
            }
            Ok(())
        }
        Commands::Configure {
            client_id,
            client_secret,
            backend,
            download_dir,
        } => {
            let mut stored = config::load_config(&config_path);
            if let Some(id) = client_id {
                stored.client_id = id;
            }
            if let Some(secret) = client_secret {
                stored.client_secret = Some(secret);
            }
            if let Some(url) = backend {
                stored.backend_endpoint = url;
            }
            if let Some(dir) = download_dir {
                stored.download_dir = dir;
            }
            config::validate_config(&stored)?;
            config::save_config(&stored, &config_path)?;
            println!("Saved {}", config_path.display());
            Ok(())
        }
        command => {
            let mut workspace = build_workspace(app_config, cli.yes)?;
            run_command(&mut workspace, command).await
        }
    }
}

async fn run_command(workspace: &mut Workspace, command: Commands) -> Result<()> {
    match command {
        Commands::Login => {
            ensure(workspace.login().await, "sign-in")?;
            println!("Signed in as {} ({})", workspace.display_name(), workspace.initials());
        }
        Commands::Logout => {
            workspace.logout();
        }
        Commands::Whoami => {
            if workspace.restore().await {
                println!("{} ({})", workspace.display_name(), workspace.initials());
            } else {
                println!("{}", workspace.display_name());
            }
        }
        Commands::Ls { folder } => {
            open_session(workspace).await?;
            if let Some(folder) = folder {
                ensure(workspace.open_entry(&folder).await, "listing")?;
                if let Some(parent) = workspace.navigation().parent() {
                    println!("(parent: {})", parent);
                }
            }
            print_listing(workspace);
        }
        Commands::TrashList => {
            open_session(workspace).await?;
            ensure(workspace.show_trash().await, "listing trash")?;
            print_listing(workspace);
        }
        Commands::Search { text } => {
            open_session(workspace).await?;
            ensure(workspace.search(&text).await, "search")?;
            print_listing(workspace);
        }
        Commands::Preview { id } => {
            open_session(workspace).await?;
            match workspace.preview(&id).await {
                Some(PreviewTarget::EnterFolder(_)) => print_listing(workspace),
                Some(target) => {
                    if let Some(url) = target.url() {
                        println!("{}", url);
                        if let Err(e) = open::that(url) {
                            tracing::warn!("Could not open browser: {}", e);
                        }
                    }
                }
                None => bail!("{} is not in the root folder", id),
            }
        }
        Commands::Upload { files, to } => {
            open_session(workspace).await?;
            if let Some(folder) = to {
                ensure(workspace.open_entry(&folder).await, "opening target folder")?;
            }
            let added = workspace.add_uploads(&files).await;
            if added.len() != files.len() {
                bail!("some files could not be queued");
            }
            for item in &added {
                println!("{}", item.card());
            }

            let transfers = workspace.transfers();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    transfers.cancel();
                }
            });
            let observer = progress_observer(workspace);
            let done = workspace.upload_pending(Some(observer)).await;
            ctrl_c.abort();

            let done = done.context("upload did not complete")?;
            for item in done {
                println!("{} -> {}", item.name, item.remote_id);
            }
        }
        Commands::Download { id, dir } => {
            open_session(workspace).await?;
            let saved = match dir {
                Some(dir) => workspace.download_to(&id, &dir).await,
                None => workspace.download(&id).await,
            };
            saved.context("download failed")?;
        }
        Commands::Trash { id } => {
            open_session(workspace).await?;
            ensure(workspace.trash_entry(&id).await, "moving to trash")?;
        }
        Commands::Restore { id } => {
            open_session(workspace).await?;
            workspace.show_trash().await;
            ensure(workspace.restore_entry(&id).await, "restore")?;
        }
        Commands::Rm { id } => {
            open_session(workspace).await?;
            workspace.show_trash().await;
            ensure(workspace.delete_forever(&id).await, "permanent delete")?;
        }
        Commands::Rename { id, name } => {
            open_session(workspace).await?;
            ensure(workspace.rename_entry(&id, &name).await, "rename")?;
        }
        Commands::Share { id, mail } => {
            open_session(workspace).await?;
            if workspace
                .open_menu(MenuKind::Share, &id, Rect::default(), 0.0, 0.0)
                .is_none()
            {
                bail!("{} is not in the root folder", id);
            }
            let action = if mail { ShareAction::Mail } else { ShareAction::Attachment };
            if let Some(url) = workspace.share(action) {
                println!("{}", url);
            }
        }
        Commands::Sync => {
            open_session(workspace).await?;
            let report = workspace.sync_backend().await.context("sync failed")?;
            println!(
                "{} folder(s), {} file(s) sent; {} failed, {} skipped",
                report.folders_sent,
                report.files_sent,
                report.failed.len(),
                report.skipped.len()
            );
        }
        Commands::About | Commands::Configure { .. } => {}
    }
    Ok(())
}
