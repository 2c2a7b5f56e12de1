//! Background mail synchronization engine
//!
//! Keeps a local message cache in step with an IMAP mailbox for a
//! PGP-aware mail client. Callers submit [`SyncTask`]s to a
//! [`SyncManager`]; one background worker runs them in order over a
//! single authenticated session and reports every result as a
//! [`SyncEvent`]. Folder refreshes are diffed by UID in [`reconcile`],
//! and a [`CacheWriter`] turns the results into [`MessageStore`] writes.
//!
//! Networking is behind capability traits ([`Connector`],
//! [`SubmissionTransport`], [`TokenProvider`]) with `async-imap` and
//! `lettre` implementations in [`ImapConnector`] and [`SmtpSubmission`].

mod cache;
mod config;
mod connection;
mod crypto;
mod error;
mod event;
mod flag;
mod folder;
mod imap;
mod manager;
mod message;
mod queue;
pub mod reconcile;
mod smtp;
mod store;
mod task;
mod transport;
mod worker;

pub use cache::{CacheUpdate, CacheWriter, InMemoryStore};
pub use config::{AccountConfig, Security, SyncSettings};
pub use connection::{ConnectionManager, ConnectionState};
pub use crypto::{
    CRYPTO_WORKERS, CryptoEngine, CryptoEvent, CryptoPool, CryptoTask, CryptoTaskKind,
    PGP_MESSAGE_MARKER, looks_encrypted,
};
pub use error::{Error, ErrorKind, Result};
pub use event::{Progress, RequestTag, SyncEvent};
pub use flag::{Flag, FlagSet};
pub use folder::{FolderType, LocalFolder};
pub use imap::{ImapAuth, ImapConnector, ImapMailbox, ImapSession};
pub use manager::{AppVisibility, SyncDeps, SyncManager};
pub use message::{EmailAddress, Envelope, RemoteMessage, Uid, parse_address_list};
pub use queue::TaskQueue;
pub use reconcile::ReconciliationResult;
pub use smtp::SmtpSubmission;
pub use store::{LocalMessageRecord, MessageStore};
pub use task::{ENCRYPTION_SNIPPET_BYTES, SyncTask, TaskKind};
pub use transport::{
    Connector, FolderStatus, MailboxSession, StaticTokenProvider, SubmissionTransport,
    TokenProvider, uid_set,
};
