//! View renderer
//!
//! Produces the display model for a listing: one card per entry with its
//! type badge, size and date labels and the actions it offers. Also holds the
//! transient menu state (share / more options), preview targets, share links
//! and the cards shown for pending uploads.

use std::fmt;
use std::time::{Duration, Instant};

use crate::providers::Entry;

/// Placeholder for unknown sizes and dates
pub const PLACEHOLDER: &str = "—";

/// Message shown for an empty trash view
pub const EMPTY_TRASH_MESSAGE: &str = "No files in Trash.";

// ============ Badges ============

/// Icon, color class and short label for a content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub icon: &'static str,
    pub color_class: &'static str,
    pub label: &'static str,
}

const fn badge(icon: &'static str, color_class: &'static str, label: &'static str) -> Badge {
    Badge {
        icon,
        color_class,
        label,
    }
}

const DEFAULT_BADGE: Badge = badge("fa-file-alt", "icon-default", "File");

static TYPE_BADGES: &[(&str, Badge)] = &[
    ("application/pdf", badge("fa-file-pdf", "icon-pdf", "PDF")),
    (
        "application/vnd.ms-powerpoint",
        badge("fa-file-powerpoint", "icon-powerpoint", "PowerPoint"),
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        badge("fa-file-powerpoint", "icon-powerpoint", "PowerPoint"),
    ),
    ("application/vnd.ms-excel", badge("fa-file-excel", "icon-excel", "Excel")),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        badge("fa-file-excel", "icon-excel", "Excel"),
    ),
    ("application/msword", badge("fa-file-word", "icon-word", "Word")),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        badge("fa-file-word", "icon-word", "Word"),
    ),
    (
        "application/vnd.google-apps.document",
        badge("fa-file-word", "icon-google-doc", "Google Doc"),
    ),
    (
        "application/vnd.google-apps.folder",
        badge("fa-folder", "icon-folder", "Folder"),
    ),
];

pub fn badge_for_mime(mime_type: &str) -> Badge {
    TYPE_BADGES
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, b)| *b)
        .unwrap_or(DEFAULT_BADGE)
}

/// Icon and color class for a local file, by extension
pub fn icon_for_file_name(name: &str) -> (&'static str, &'static str) {
    let ext = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => ("fa-file-pdf", "icon-pdf"),
        "ppt" | "pptx" => ("fa-file-powerpoint", "icon-powerpoint"),
        "xls" | "xlsx" => ("fa-file-excel", "icon-excel"),
        "doc" | "docx" => ("fa-file-word", "icon-word"),
        "png" | "jpg" | "jpeg" | "gif" => ("fa-file-image", "icon-default"),
        _ => ("fa-file-alt", "icon-default"),
    }
}

// ============ Labels ============

/// Bytes as mebibytes with one decimal, e.g. `2.0 MB`
pub fn format_mb(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// Size label for a non-folder entry; empty or unknown sizes show the placeholder
pub fn size_label(entry: &Entry) -> String {
    match entry.size {
        Some(size) if size > 0 => format_mb(size),
        _ => PLACEHOLDER.to_string(),
    }
}

pub fn date_label(entry: &Entry) -> String {
    entry
        .modified_time
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

// ============ Cards ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Normal,
    Trash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardAction {
    Preview,
    Download,
    Share,
    More,
    Restore,
    PermanentDelete,
}

impl CardAction {
    pub fn label(self) -> &'static str {
        match self {
            CardAction::Preview => "Preview",
            CardAction::Download => "Download",
            CardAction::Share => "Share",
            CardAction::More => "More",
            CardAction::Restore => "Restore",
            CardAction::PermanentDelete => "Delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub entry_id: String,
    pub name: String,
    pub mime_type: String,
    pub is_folder: bool,
    pub badge: Badge,
    /// Absent for folders
    pub size_label: Option<String>,
    pub date_label: String,
    pub actions: Vec<CardAction>,
    pub visible: bool,
}

impl Card {
    pub fn from_entry(entry: &Entry, mode: RenderMode) -> Self {
        let is_folder = entry.is_folder();
        let actions = match (mode, is_folder) {
            (RenderMode::Trash, _) => vec![
                CardAction::Preview,
                CardAction::Restore,
                CardAction::PermanentDelete,
            ],
            (RenderMode::Normal, true) => vec![CardAction::Preview],
            (RenderMode::Normal, false) => vec![
                CardAction::Preview,
                CardAction::Download,
                CardAction::Share,
                CardAction::More,
            ],
        };

        Self {
            entry_id: entry.id.clone(),
            name: entry.name.clone(),
            mime_type: entry.mime_type.clone(),
            is_folder,
            badge: badge_for_mime(&entry.mime_type),
            size_label: (!is_folder).then(|| size_label(entry)),
            date_label: date_label(entry),
            actions,
            visible: true,
        }
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions: Vec<&str> = self.actions.iter().map(|a| a.label()).collect();
        write!(
            f,
            "[{:<10}] {:<40} {:>10}  {}  ({})  {}",
            self.badge.label,
            self.name,
            self.size_label.as_deref().unwrap_or(""),
            self.date_label,
            actions.join(", "),
            self.entry_id
        )
    }
}

/// The documents area: the rendered cards of the current view
#[derive(Debug, Default, Clone)]
pub struct DocumentsPane {
    cards: Vec<Card>,
    message: Option<String>,
}

impl DocumentsPane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pane's content with one card per entry, in input order
    pub fn render(&mut self, entries: &[Entry], mode: RenderMode) {
        self.clear();
        self.cards = entries.iter().map(|e| Card::from_entry(e, mode)).collect();
        if mode == RenderMode::Trash && entries.is_empty() {
            self.message = Some(EMPTY_TRASH_MESSAGE.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.cards.clear();
        self.message = None;
    }

    /// Show only cards whose name contains `query` (case-insensitive).
    /// A blank query shows every card. Returns the number of visible cards.
    pub fn filter(&mut self, query: &str) -> usize {
        let needle = query.trim().to_lowercase();
        for card in &mut self.cards {
            card.visible = needle.is_empty() || card.name.to_lowercase().contains(&needle);
        }
        self.visible_cards().count()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn visible_cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter().filter(|c| c.visible)
    }

    pub fn find(&self, entry_id: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.entry_id == entry_id)
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for DocumentsPane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.message {
            return writeln!(f, "{}", message);
        }
        for card in self.visible_cards() {
            writeln!(f, "{}", card)?;
        }
        Ok(())
    }
}

// ============ Preview ============

/// The single entry currently shown in the preview
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewContext {
    pub entry_id: String,
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewTarget {
    /// Folders are entered instead of previewed
    EnterFolder(String),
    /// Direct image view URL
    Image(String),
    /// Embedded preview page URL
    Embedded(String),
}

impl PreviewTarget {
    pub fn for_entry(entry_id: &str, mime_type: &str) -> Self {
        if mime_type == crate::providers::FOLDER_MIME {
            PreviewTarget::EnterFolder(entry_id.to_string())
        } else if mime_type.starts_with("image/") {
            PreviewTarget::Image(format!(
                "https://drive.google.com/uc?export=view&id={}",
                urlencoding::encode(entry_id)
            ))
        } else {
            PreviewTarget::Embedded(format!(
                "https://drive.google.com/file/d/{}/preview",
                urlencoding::encode(entry_id)
            ))
        }
    }

    /// URL to open in a new window, if any
    pub fn url(&self) -> Option<&str> {
        match self {
            PreviewTarget::EnterFolder(_) => None,
            PreviewTarget::Image(url) | PreviewTarget::Embedded(url) => Some(url),
        }
    }
}

// ============ Menus ============

/// Entry the share / more-options menus act on
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTarget {
    pub entry_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Share,
    MoreOptions,
}

/// Bounding box of the element that opened a menu, viewport coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MenuPosition {
    pub top: f64,
    pub left: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct OpenMenu {
    kind: MenuKind,
    position: MenuPosition,
    pointer_left_at: Option<Instant>,
}

/// Transient menus. At most one is open at a time.
#[derive(Debug, Clone)]
pub struct Overlays {
    open: Option<OpenMenu>,
    target: Option<ActionTarget>,
    hide_delay: Duration,
}

impl Overlays {
    pub fn new(hide_delay: Duration) -> Self {
        Self {
            open: None,
            target: None,
            hide_delay,
        }
    }

    /// Open `kind` below its trigger, closing any other menu
    pub fn open(
        &mut self,
        kind: MenuKind,
        target: ActionTarget,
        trigger: Rect,
        scroll_x: f64,
        scroll_y: f64,
    ) -> MenuPosition {
        let position = MenuPosition {
            top: trigger.bottom + scroll_y,
            left: trigger.left + scroll_x,
        };
        self.open = Some(OpenMenu {
            kind,
            position,
            pointer_left_at: None,
        });
        self.target = Some(target);
        position
    }

    pub fn close(&mut self) {
        self.open = None;
    }

    pub fn outside_click(&mut self) {
        self.close();
    }

    /// Pointer left both the trigger and the menu
    pub fn pointer_left(&mut self, now: Instant) {
        if let Some(ref mut menu) = self.open {
            menu.pointer_left_at = Some(now);
        }
    }

    /// Pointer is back over the trigger or menu
    pub fn pointer_entered(&mut self) {
        if let Some(ref mut menu) = self.open {
            menu.pointer_left_at = None;
        }
    }

    /// Hide the menu once the pointer has been away for the hide delay.
    /// Returns true when a menu was hidden.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = self
            .open
            .as_ref()
            .and_then(|m| m.pointer_left_at)
            .is_some_and(|left| now.duration_since(left) >= self.hide_delay);
        if expired {
            self.close();
        }
        expired
    }

    pub fn open_menu(&self) -> Option<MenuKind> {
        self.open.as_ref().map(|m| m.kind)
    }

    pub fn position(&self) -> Option<MenuPosition> {
        self.open.as_ref().map(|m| m.position)
    }

    /// Last entry a menu was opened for; survives the menu closing
    pub fn target(&self) -> Option<&ActionTarget> {
        self.target.as_ref()
    }
}

// ============ Share ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareAction {
    /// Direct media link to attach elsewhere
    Attachment,
    /// Webmail compose window with a view link in the body
    Mail,
}

impl ShareAction {
    pub fn url(self, target: &ActionTarget) -> String {
        let id = urlencoding::encode(&target.entry_id);
        match self {
            ShareAction::Attachment => {
                format!("https://www.googleapis.com/drive/v3/files/{}?alt=media", id)
            }
            ShareAction::Mail => {
                let view_link = format!("https://drive.google.com/file/d/{}/view", id);
                let subject = format!("Shared File: {}", target.name);
                let body = format!(
                    "Hi,\n\nHere's a file I wanted to share with you:\n\n{}",
                    view_link
                );
                format!(
                    "https://mail.google.com/mail/?view=cm&fs=1&su={}&body={}",
                    urlencoding::encode(&subject),
                    urlencoding::encode(&body)
                )
            }
        }
    }
}

// ============ Upload cards ============

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCard {
    pub name: String,
    pub icon: &'static str,
    pub color_class: &'static str,
    pub size_label: String,
    pub status: String,
}

impl UploadCard {
    pub fn new(name: &str, size: u64, status: impl Into<String>) -> Self {
        let (icon, color_class) = icon_for_file_name(name);
        Self {
            name: name.to_string(),
            icon,
            color_class,
            size_label: format_mb(size),
            status: status.into(),
        }
    }
}

impl fmt::Display for UploadCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})  {}", self.name, self.size_label, self.status)
    }
}
