//! Applying sync results to the local cache
//!
//! [`CacheWriter`] is the usual consumer of the event stream: it turns
//! reconciliation output into store writes and works out which messages
//! deserve a new-mail notification. [`InMemoryStore`] is a complete
//! [`MessageStore`] for tools and tests that need no persistence.

use crate::error::Result;
use crate::event::SyncEvent;
use crate::folder::LocalFolder;
use crate::message::{RemoteMessage, Uid};
use crate::store::{LocalMessageRecord, MessageStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Key = (String, String, Uid);

#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<BTreeMap<Key, LocalMessageRecord>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<Key, LocalMessageRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn folder_rows(&self, account: &str, folder_alias: &str) -> Vec<LocalMessageRecord> {
        self.rows()
            .values()
            .filter(|r| r.account == account && r.folder_alias == folder_alias)
            .cloned()
            .collect()
    }

    /// Look up one cached message.
    #[must_use]
    pub fn get(&self, account: &str, folder_alias: &str, uid: Uid) -> Option<LocalMessageRecord> {
        self.rows()
            .get(&(account.to_string(), folder_alias.to_string(), uid))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn add_rows(&self, records: Vec<LocalMessageRecord>) -> Result<usize> {
        let mut rows = self.rows();
        let count = records.len();
        for record in records {
            let key = (
                record.account.clone(),
                record.folder_alias.clone(),
                record.uid,
            );
            rows.insert(key, record);
        }
        Ok(count)
    }

    async fn update_flags_by_uid(
        &self,
        account: &str,
        folder_alias: &str,
        updates: &[(Uid, String)],
    ) -> Result<usize> {
        let mut rows = self.rows();
        let mut updated = 0;
        for (uid, flags) in updates {
            let key = (account.to_string(), folder_alias.to_string(), *uid);
            if let Some(record) = rows.get_mut(&key) {
                record.flags = Some(flags.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_by_uid(
        &self,
        account: &str,
        folder_alias: &str,
        uids: &BTreeSet<Uid>,
    ) -> Result<usize> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|(a, f, uid), _| !(a == account && f == folder_alias && uids.contains(uid)));
        Ok(before - rows.len())
    }

    async fn uid_flags(
        &self,
        account: &str,
        folder_alias: &str,
    ) -> Result<HashMap<Uid, Option<String>>> {
        Ok(self
            .folder_rows(account, folder_alias)
            .into_iter()
            .map(|r| (r.uid, r.flags))
            .collect())
    }

    async fn new_messages(
        &self,
        account: &str,
        folder_alias: &str,
    ) -> Result<Vec<LocalMessageRecord>> {
        Ok(self
            .folder_rows(account, folder_alias)
            .into_iter()
            .filter(|r| r.is_new)
            .collect())
    }

    async fn unseen_uids(&self, account: &str, folder_alias: &str) -> Result<Vec<Uid>> {
        Ok(self
            .folder_rows(account, folder_alias)
            .into_iter()
            .filter(|r| !r.is_seen())
            .map(|r| r.uid)
            .collect())
    }
}

/// What one event changed in the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheUpdate {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// New, unseen messages the user should be told about.
    pub notify: Vec<LocalMessageRecord>,
}

/// Persists sync results for one account.
pub struct CacheWriter<S> {
    account: String,
    store: S,
}

impl<S: MessageStore> CacheWriter<S> {
    #[must_use]
    pub fn new(account: impl Into<String>, store: S) -> Self {
        Self {
            account: account.into(),
            store,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Apply one event. Events that carry no cache data are ignored.
    ///
    /// # Errors
    ///
    /// Returns the store's error if a write fails.
    pub async fn apply(&self, event: &SyncEvent) -> Result<CacheUpdate> {
        let mut update = CacheUpdate::default();

        match event {
            SyncEvent::MsgsReceived {
                folder, messages, ..
            } => {
                let records = self.records(folder, messages, &BTreeMap::new(), false);
                update.inserted = self.store.add_rows(records).await?;
            }
            SyncEvent::NewMsgsReceived {
                folder,
                messages,
                encryption_states,
                notify,
                ..
            } => {
                let records = self.records(folder, messages, encryption_states, *notify);
                update.inserted = self.store.add_rows(records).await?;
                if *notify {
                    update.notify = self.unseen_new_messages(folder).await?;
                }
            }
            SyncEvent::RefreshMsgsReceived {
                folder,
                new_msgs,
                updated_msgs,
                deleted_uids,
                encryption_states,
                notify,
                ..
            } => {
                update.deleted = self
                    .store
                    .delete_by_uid(&self.account, &folder.alias, deleted_uids)
                    .await?;

                let records = self.records(folder, new_msgs, encryption_states, *notify);
                update.inserted = self.store.add_rows(records).await?;

                let flags: Vec<(Uid, String)> = updated_msgs
                    .iter()
                    .filter_map(|m| Some((m.uid?, m.flags.to_string())))
                    .collect();
                update.updated = self
                    .store
                    .update_flags_by_uid(&self.account, &folder.alias, &flags)
                    .await?;

                if *notify {
                    update.notify = self.unseen_new_messages(folder).await?;
                }
            }
            SyncEvent::MsgsMoved { source, uids, .. } => {
                let uids: BTreeSet<Uid> = uids.iter().copied().collect();
                update.deleted = self
                    .store
                    .delete_by_uid(&self.account, &source.alias, &uids)
                    .await?;
            }
            _ => {}
        }

        if update != CacheUpdate::default() {
            debug!(
                "Cache: +{} ~{} -{} ({} to notify)",
                update.inserted,
                update.updated,
                update.deleted,
                update.notify.len()
            );
        }
        Ok(update)
    }

    fn records(
        &self,
        folder: &LocalFolder,
        messages: &[RemoteMessage],
        encryption_states: &BTreeMap<Uid, bool>,
        is_new: bool,
    ) -> Vec<LocalMessageRecord> {
        messages
            .iter()
            .filter_map(|m| {
                let encrypted = m.uid.and_then(|uid| encryption_states.get(&uid).copied());
                LocalMessageRecord::from_remote(&self.account, &folder.alias, m, encrypted, is_new)
            })
            .collect()
    }

    async fn unseen_new_messages(&self, folder: &LocalFolder) -> Result<Vec<LocalMessageRecord>> {
        let unseen: BTreeSet<Uid> = self
            .store
            .unseen_uids(&self.account, &folder.alias)
            .await?
            .into_iter()
            .collect();
        Ok(self
            .store
            .new_messages(&self.account, &folder.alias)
            .await?
            .into_iter()
            .filter(|r| unseen.contains(&r.uid))
            .collect())
    }
}
