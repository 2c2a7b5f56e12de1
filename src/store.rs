//! The local message cache capability
//!
//! The sync engine only reads from the store (to take a snapshot before
//! reconciling). Writes happen in whoever consumes the
//! [`crate::SyncEvent`] stream, typically a [`crate::CacheWriter`].
//! Every operation is keyed by account email and folder alias.

use crate::error::Result;
use crate::message::{Envelope, RemoteMessage, Uid};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One cached message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalMessageRecord {
    pub account: String,
    pub folder_alias: String,
    pub uid: Uid,
    /// Canonical flag string, `None` until flags were observed once.
    pub flags: Option<String>,
    /// `None` when the encryption state has not been classified.
    pub encrypted: Option<bool>,
    /// Arrived since the last sync and not yet announced.
    pub is_new: bool,
    pub envelope: Envelope,
}

impl LocalMessageRecord {
    /// Build a record from a server listing entry.
    ///
    /// Returns `None` for entries without a UID.
    #[must_use]
    pub fn from_remote(
        account: &str,
        folder_alias: &str,
        message: &RemoteMessage,
        encrypted: Option<bool>,
        is_new: bool,
    ) -> Option<Self> {
        Some(Self {
            account: account.to_string(),
            folder_alias: folder_alias.to_string(),
            uid: message.uid?,
            flags: Some(message.flags.to_string()),
            encrypted,
            is_new,
            envelope: message.envelope.clone(),
        })
    }

    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.flags
            .as_deref()
            .is_some_and(|flags| crate::flag::FlagSet::parse(flags).is_seen())
    }
}

/// Persistent message cache keyed by (account, folder alias, UID).
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert records, replacing any with the same key. Returns how many
    /// were written.
    async fn add_rows(&self, records: Vec<LocalMessageRecord>) -> Result<usize>;

    /// Overwrite the stored flag string of each listed UID.
    async fn update_flags_by_uid(
        &self,
        account: &str,
        folder_alias: &str,
        updates: &[(Uid, String)],
    ) -> Result<usize>;

    async fn delete_by_uid(
        &self,
        account: &str,
        folder_alias: &str,
        uids: &BTreeSet<Uid>,
    ) -> Result<usize>;

    /// Snapshot of every cached UID and its stored flags.
    async fn uid_flags(&self, account: &str, folder_alias: &str)
    -> Result<HashMap<Uid, Option<String>>>;

    /// Records flagged as new, oldest first.
    async fn new_messages(
        &self,
        account: &str,
        folder_alias: &str,
    ) -> Result<Vec<LocalMessageRecord>>;

    /// UIDs of cached messages without `\Seen`, ascending.
    async fn unseen_uids(&self, account: &str, folder_alias: &str) -> Result<Vec<Uid>>;
}

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn add_rows(&self, records: Vec<LocalMessageRecord>) -> Result<usize> {
        (**self).add_rows(records).await
    }

    async fn update_flags_by_uid(
        &self,
        account: &str,
        folder_alias: &str,
        updates: &[(Uid, String)],
    ) -> Result<usize> {
        (**self)
            .update_flags_by_uid(account, folder_alias, updates)
            .await
    }

    async fn delete_by_uid(
        &self,
        account: &str,
        folder_alias: &str,
        uids: &BTreeSet<Uid>,
    ) -> Result<usize> {
        (**self).delete_by_uid(account, folder_alias, uids).await
    }

    async fn uid_flags(
        &self,
        account: &str,
        folder_alias: &str,
    ) -> Result<HashMap<Uid, Option<String>>> {
        (**self).uid_flags(account, folder_alias).await
    }

    async fn new_messages(
        &self,
        account: &str,
        folder_alias: &str,
    ) -> Result<Vec<LocalMessageRecord>> {
        (**self).new_messages(account, folder_alias).await
    }

    async fn unseen_uids(&self, account: &str, folder_alias: &str) -> Result<Vec<Uid>> {
        (**self).unseen_uids(account, folder_alias).await
    }
}
