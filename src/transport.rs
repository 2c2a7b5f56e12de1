//! Protocol capabilities the sync engine runs against
//!
//! The worker never talks to a wire protocol directly. It asks a
//! [`TokenProvider`] for credentials, opens a [`MailboxSession`] through
//! a [`Connector`] and hands raw messages to a [`SubmissionTransport`].
//! [`crate::imap`] and [`crate::smtp`] provide the network
//! implementations; tests substitute scripted ones.

use crate::error::{Error, Result};
use crate::folder::LocalFolder;
use crate::message::{RemoteMessage, Uid};
use async_trait::async_trait;
use std::env;
use std::fmt::Write as _;

/// Source of the account address and a fresh OAuth2 access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The account's email address.
    fn email(&self) -> &str;

    /// A token valid for at least the next protocol exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the credential cannot be refreshed.
    async fn valid_token(&self) -> Result<String>;
}

/// Opens authenticated mailbox sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the server rejects the credentials
    /// and a transient error when the server cannot be reached.
    async fn connect(&self, email: &str, token: &str) -> Result<Box<dyn MailboxSession>>;
}

/// What SELECT reports about a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStatus {
    /// Number of messages in the folder.
    pub exists: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<Uid>,
}

/// One authenticated remote mailbox connection.
///
/// UID set arguments use IMAP syntax (`4`, `1:7`, `3,5:9`, `12:*`).
#[async_trait]
pub trait MailboxSession: Send {
    /// Cheap round trip used as a liveness probe.
    async fn noop(&mut self) -> Result<()>;

    async fn list_folders(&mut self) -> Result<Vec<LocalFolder>>;

    async fn select(&mut self, folder: &str) -> Result<FolderStatus>;

    /// UIDs matching an IMAP search query, ascending.
    async fn uid_search(&mut self, query: &str) -> Result<Vec<Uid>>;

    /// UID and flags for every message in `uid_set`.
    async fn fetch_flags(&mut self, uid_set: &str) -> Result<Vec<RemoteMessage>>;

    /// UID, flags, size and parsed header block for every message in
    /// `uid_set`.
    async fn fetch_headers(&mut self, uid_set: &str) -> Result<Vec<RemoteMessage>>;

    /// The first `max_bytes` of each message body, without setting
    /// `\Seen`.
    async fn fetch_text_snippets(
        &mut self,
        uid_set: &str,
        max_bytes: u32,
    ) -> Result<Vec<(Uid, Vec<u8>)>>;

    /// The complete raw message, or `None` if the UID no longer exists.
    async fn fetch_raw(&mut self, uid: Uid) -> Result<Option<Vec<u8>>>;

    /// Move messages from the selected folder to `destination`.
    async fn move_messages(&mut self, uid_set: &str, destination: &str) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Hands finished MIME messages to the outgoing mail server.
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Smtp`] when the server refuses the message and
    /// [`Error::Auth`] when it refuses the credentials.
    async fn send_raw(&self, email: &str, token: &str, raw: &[u8]) -> Result<()>;
}

/// A token provider with a fixed token, for app passwords, bridges and
/// scripts that refresh tokens out of band.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    email: String,
    token: String,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            token: token.into(),
        }
    }

    /// Reads `MAIL_EMAIL` and `MAIL_OAUTH_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either variable is missing.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let email =
            env::var("MAIL_EMAIL").map_err(|_| Error::Config("MAIL_EMAIL not set".into()))?;
        let token = env::var("MAIL_OAUTH_TOKEN")
            .map_err(|_| Error::Config("MAIL_OAUTH_TOKEN not set".into()))?;
        Ok(Self::new(email, token))
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn email(&self) -> &str {
        &self.email
    }

    async fn valid_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(Error::Auth("no access token configured".into()));
        }
        Ok(self.token.clone())
    }
}

/// Render UIDs as a compact IMAP sequence set, joining consecutive
/// runs into ranges.
///
/// # Examples
///
/// ```
/// use cryptmail_sync::uid_set;
///
/// assert_eq!(uid_set([1, 2, 3, 7, 9, 10]), "1:3,7,9:10");
/// assert_eq!(uid_set([5]), "5");
/// ```
#[must_use]
pub fn uid_set(uids: impl IntoIterator<Item = Uid>) -> String {
    let mut sorted: Vec<Uid> = uids.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if !out.is_empty() {
            out.push(',');
        }
        if start == end {
            let _ = write!(out, "{start}");
        } else {
            let _ = write!(out, "{start}:{end}");
        }
    }
    out
}
