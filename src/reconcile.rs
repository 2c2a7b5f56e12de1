//! UID-keyed reconciliation of a remote listing against the local cache
//!
//! Every function here is pure: it takes one snapshot of the local
//! cache and one remote listing and says which UIDs need an insert, a
//! flag update, or a delete. Remote entries whose UID could not be read
//! (the message was expunged mid-fetch) are skipped and logged. They
//! never appear in any candidate set and never fail the pass.

use crate::message::{RemoteMessage, Uid};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

/// The three disjoint candidate sets of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub insert: BTreeSet<Uid>,
    pub update: BTreeSet<Uid>,
    pub delete: BTreeSet<Uid>,
    /// Remote entries dropped because their UID lookup failed.
    pub skipped: usize,
}

impl ReconciliationResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// UIDs of the listing, skipping failed lookups.
fn remote_uids(remote: &[RemoteMessage]) -> HashSet<Uid> {
    remote.iter().filter_map(|m| m.uid).collect()
}

fn log_skipped(remote: &[RemoteMessage]) -> usize {
    let skipped = remote.iter().filter(|m| m.uid.is_none()).count();
    if skipped > 0 {
        warn!(
            "Skipped {} remote message(s) expunged during the fetch",
            skipped
        );
    }
    skipped
}

/// Local UIDs that are no longer on the server.
#[must_use]
pub fn delete_candidates(local_uids: &HashSet<Uid>, remote: &[RemoteMessage]) -> BTreeSet<Uid> {
    let remote = remote_uids(remote);
    local_uids
        .iter()
        .filter(|uid| !remote.contains(uid))
        .copied()
        .collect()
}

/// Remote messages the local cache does not have yet.
#[must_use]
pub fn insert_candidates<'a>(
    local_uids: &HashSet<Uid>,
    remote: &'a [RemoteMessage],
) -> Vec<&'a RemoteMessage> {
    remote
        .iter()
        .filter(|m| m.uid.is_some_and(|uid| !local_uids.contains(&uid)))
        .collect()
}

/// Cached messages whose flags changed on the server.
///
/// A cached message without a stored flag string compares as the
/// empty string.
#[must_use]
pub fn update_candidates<'a, S: AsRef<str>>(
    local_flags: &HashMap<Uid, Option<S>>,
    remote: &'a [RemoteMessage],
) -> Vec<&'a RemoteMessage> {
    remote
        .iter()
        .filter(|m| {
            let Some(uid) = m.uid else {
                return false;
            };
            local_flags.get(&uid).is_some_and(|stored| {
                let stored = stored.as_ref().map_or("", AsRef::as_ref);
                !m.flags.matches_stored(stored)
            })
        })
        .collect()
}

/// Run all three diffs against one local snapshot.
#[must_use]
pub fn reconcile<S: AsRef<str>>(
    local_flags: &HashMap<Uid, Option<S>>,
    remote: &[RemoteMessage],
) -> ReconciliationResult {
    let local_uids: HashSet<Uid> = local_flags.keys().copied().collect();

    ReconciliationResult {
        insert: insert_candidates(&local_uids, remote)
            .into_iter()
            .filter_map(|m| m.uid)
            .collect(),
        update: update_candidates(local_flags, remote)
            .into_iter()
            .filter_map(|m| m.uid)
            .collect(),
        delete: delete_candidates(&local_uids, remote),
        skipped: log_skipped(remote),
    }
}
