//! Mail folder types
//!
//! The server addresses a folder by its full name, while the local
//! cache keys messages by a display alias. [`LocalFolder`] carries
//! both, plus the folder's LIST attributes, which decide its
//! [`FolderType`].

use serde::Serialize;
use std::fmt;

/// The role of a folder.
///
/// Detected from RFC 6154 special-use attributes when the server sends
/// them, otherwise from well-known names.
///
/// # Examples
///
/// ```
/// use cryptmail_sync::{FolderType, LocalFolder};
///
/// let inbox = LocalFolder::new("INBOX", "Inbox");
/// assert_eq!(inbox.folder_type(), FolderType::Inbox);
///
/// let sent = LocalFolder::new("[Gmail]/Sent Mail", "Sent")
///     .with_attributes(vec!["\\Sent".to_string()]);
/// assert_eq!(sent.folder_type(), FolderType::Sent);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderType {
    /// The INBOX folder (RFC 3501 required, case-insensitive).
    Inbox,
    /// Sent messages.
    Sent,
    /// Draft messages.
    Drafts,
    /// Deleted messages.
    Trash,
    /// Spam / junk messages.
    Spam,
    /// Archived messages.
    Archive,
    /// Gmail's virtual "All Mail" folder.
    All,
    /// Messages waiting to be sent. Local only.
    Outbox,
    /// A user-defined or server-specific folder.
    Other,
}

impl FolderType {
    fn from_attribute(attribute: &str) -> Option<Self> {
        match attribute.trim_start_matches('\\').to_ascii_lowercase().as_str() {
            "inbox" => Some(Self::Inbox),
            "sent" => Some(Self::Sent),
            "drafts" => Some(Self::Drafts),
            "trash" => Some(Self::Trash),
            "junk" | "spam" => Some(Self::Spam),
            "archive" => Some(Self::Archive),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("inbox") {
            return Self::Inbox;
        }
        match name {
            "Sent" => Self::Sent,
            "Drafts" => Self::Drafts,
            "Trash" => Self::Trash,
            "Spam" | "Junk" => Self::Spam,
            "Archive" => Self::Archive,
            "Outbox" => Self::Outbox,
            _ => Self::Other,
        }
    }
}

/// A folder as the local cache knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LocalFolder {
    /// The server's canonical name, used in IMAP commands.
    pub full_name: String,
    /// The display name, used as the local cache key.
    pub alias: String,
    /// LIST attributes such as `\Sent` or `\Noselect`.
    pub attributes: Vec<String>,
}

impl LocalFolder {
    #[must_use]
    pub fn new(full_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            alias: alias.into(),
            attributes: Vec::new(),
        }
    }

    /// The server's INBOX, aliased as `INBOX`.
    #[must_use]
    pub fn inbox() -> Self {
        Self::new("INBOX", "INBOX")
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn folder_type(&self) -> FolderType {
        self.attributes
            .iter()
            .find_map(|a| FolderType::from_attribute(a))
            .unwrap_or_else(|| FolderType::from_name(&self.full_name))
    }

    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.folder_type() == FolderType::Inbox
    }

    /// Folders flagged `\Noselect` cannot hold messages.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case("\\Noselect") || a.eq_ignore_ascii_case("\\NonExistent"))
    }
}

impl fmt::Display for LocalFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}
