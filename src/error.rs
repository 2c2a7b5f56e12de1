//! Error types for cryptmail-sync

use crate::message::Uid;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Server rejected command: {0}")]
    Protocol(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message store error: {0}")]
    Store(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Message UID {0} was removed from the server")]
    MessageRemoved(Uid),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a failure is handled by the sync worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network hiccup. Reported; the connection is kept.
    TransientIo,
    /// Unrecoverable credential failure. Reported; the connection is
    /// torn down and the caller must re-authenticate.
    Auth,
    /// The server (or a collaborator) rejected this specific command.
    /// Reported; the connection is kept.
    Protocol,
    /// The message vanished mid-operation. Never reported.
    MessageRemovedRace,
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Tls(_) | Self::Imap(_) | Self::Cancelled => ErrorKind::TransientIo,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Protocol(_)
            | Self::Smtp(_)
            | Self::Config(_)
            | Self::Store(_)
            | Self::Crypto(_) => ErrorKind::Protocol,
            Self::MessageRemoved(_) => ErrorKind::MessageRemovedRace,
        }
    }
}
