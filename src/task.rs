//! Sync tasks and their execution
//!
//! A [`SyncTask`] is immutable once queued. [`SyncTask::execute`] is the
//! single dispatch point: it picks the transport a task needs and runs
//! the protocol exchange for its [`TaskKind`], reporting the outcome as
//! a [`SyncEvent`].

use crate::config::SyncSettings;
use crate::connection::ConnectionManager;
use crate::crypto::looks_encrypted;
use crate::error::{Error, Result};
use crate::event::{Progress, RequestTag, SyncEvent};
use crate::folder::LocalFolder;
use crate::manager::AppVisibility;
use crate::message::{RemoteMessage, Uid};
use crate::reconcile;
use crate::store::MessageStore;
use crate::transport::{MailboxSession, SubmissionTransport, TokenProvider, uid_set};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How much of a body is fetched to classify its encryption state.
pub const ENCRYPTION_SNIPPET_BYTES: u32 = 2048;

/// One unit of work for the sync worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub owner_key: String,
    pub request_code: i32,
    pub kind: TaskKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// List every folder on the server.
    UpdateLabels,
    /// Messages at 1-based positions `start..=end`, oldest first.
    LoadMessages {
        folder: LocalFolder,
        start: u32,
        end: u32,
    },
    /// The complete raw message.
    LoadMessageDetails { folder: LocalFolder, uid: Uid },
    /// The next page of messages older than the `already_loaded`
    /// newest ones.
    LoadMessagesToCache {
        folder: LocalFolder,
        already_loaded: u32,
    },
    /// Messages with a UID above `last_uid` that are not cached yet.
    LoadNewMessages { folder: LocalFolder, last_uid: Uid },
    MoveMessages {
        source: LocalFolder,
        destination: LocalFolder,
        uids: Vec<Uid>,
    },
    /// Submit a finished MIME message.
    SendMessage { raw: Vec<u8> },
    /// Reconcile the whole folder against the local cache.
    SyncFolder { folder: LocalFolder },
}

impl TaskKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpdateLabels => "update_labels",
            Self::LoadMessages { .. } => "load_messages",
            Self::LoadMessageDetails { .. } => "load_message_details",
            Self::LoadMessagesToCache { .. } => "load_messages_to_cache",
            Self::LoadNewMessages { .. } => "load_new_messages",
            Self::MoveMessages { .. } => "move_messages",
            Self::SendMessage { .. } => "send_message",
            Self::SyncFolder { .. } => "sync_folder",
        }
    }
}

impl SyncTask {
    #[must_use]
    pub fn new(owner_key: impl Into<String>, request_code: i32, kind: TaskKind) -> Self {
        Self {
            owner_key: owner_key.into(),
            request_code,
            kind,
        }
    }

    #[must_use]
    pub fn tag(&self) -> RequestTag {
        RequestTag::new(self.owner_key.clone(), self.request_code)
    }

    /// Run the task, reporting its result through `ctx`.
    ///
    /// Mailbox tasks call [`ConnectionManager::ensure_connected`] first;
    /// [`TaskKind::SendMessage`] never touches the mailbox session.
    pub(crate) async fn execute(&self, channels: Channels<'_>, ctx: &TaskContext<'_>) -> Result<()> {
        let Channels {
            connection,
            submission,
            tokens,
        } = channels;

        match &self.kind {
            TaskKind::SendMessage { raw } => send_message(submission, tokens, raw, ctx).await,
            TaskKind::UpdateLabels => update_labels(ctx.mailbox(connection).await?, ctx).await,
            TaskKind::LoadMessages { folder, start, end } => {
                let session = ctx.mailbox(connection).await?;
                load_messages(session, ctx, folder, i64::from(*start), i64::from(*end)).await
            }
            TaskKind::LoadMessageDetails { folder, uid } => {
                load_message_details(ctx.mailbox(connection).await?, ctx, folder, *uid).await
            }
            TaskKind::LoadMessagesToCache {
                folder,
                already_loaded,
            } => {
                let session = ctx.mailbox(connection).await?;
                load_messages_to_cache(session, ctx, folder, *already_loaded).await
            }
            TaskKind::LoadNewMessages { folder, last_uid } => {
                load_new_messages(ctx.mailbox(connection).await?, ctx, folder, *last_uid).await
            }
            TaskKind::MoveMessages {
                source,
                destination,
                uids,
            } => {
                let session = ctx.mailbox(connection).await?;
                move_messages(session, ctx, source, destination, uids).await
            }
            TaskKind::SyncFolder { folder } => {
                sync_folder(ctx.mailbox(connection).await?, ctx, folder).await
            }
        }
    }
}

/// The transports a task may need.
pub(crate) struct Channels<'a> {
    pub connection: &'a mut ConnectionManager,
    pub submission: &'a dyn SubmissionTransport,
    pub tokens: &'a dyn TokenProvider,
}

/// Everything a running task reads besides its transport.
pub(crate) struct TaskContext<'a> {
    pub tag: RequestTag,
    pub account: &'a str,
    pub store: &'a dyn MessageStore,
    pub settings: &'a SyncSettings,
    pub visibility: &'a AppVisibility,
    pub events: &'a UnboundedSender<SyncEvent>,
    pub cancel: &'a CancellationToken,
}

impl TaskContext<'_> {
    pub(crate) fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    pub(crate) fn progress(&self, progress: Progress) {
        self.emit(SyncEvent::Progress {
            tag: self.tag.clone(),
            progress,
        });
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// A live session, reconnecting with progress reports if needed.
    async fn mailbox<'c>(
        &self,
        connection: &'c mut ConnectionManager,
    ) -> Result<&'c mut dyn MailboxSession> {
        self.check_cancelled()?;
        let mut reconnected = false;
        let session = connection
            .ensure_connected_with(|| {
                reconnected = true;
                self.progress(Progress::Connecting);
            })
            .await?;
        if reconnected {
            self.progress(Progress::Connected);
        }
        self.check_cancelled()?;
        Ok(session)
    }

    /// The user should hear about new mail only for the inbox, and only
    /// while the app is in the background.
    fn should_notify(&self, folder: &LocalFolder) -> bool {
        !self.visibility.is_foreground() && folder.is_inbox()
    }
}

async fn send_message(
    submission: &dyn SubmissionTransport,
    tokens: &dyn TokenProvider,
    raw: &[u8],
    ctx: &TaskContext<'_>,
) -> Result<()> {
    let token = tokens.valid_token().await?;
    ctx.check_cancelled()?;
    submission.send_raw(tokens.email(), &token, raw).await?;
    info!("Message sent for {}", ctx.tag.owner_key);
    ctx.emit(SyncEvent::MsgSent {
        tag: ctx.tag.clone(),
    });
    Ok(())
}

async fn update_labels(session: &mut dyn MailboxSession, ctx: &TaskContext<'_>) -> Result<()> {
    let folders = session.list_folders().await?;
    debug!("Listed {} folders", folders.len());
    ctx.emit(SyncEvent::FolderInfoReceived {
        tag: ctx.tag.clone(),
        folders,
    });
    Ok(())
}

/// Headers of the messages at 1-based positions `start..=end`, clamped
/// to the folder.
async fn messages_at(
    session: &mut dyn MailboxSession,
    start: i64,
    end: i64,
) -> Result<Vec<RemoteMessage>> {
    let uids = session.uid_search("ALL").await?;
    let count = i64::try_from(uids.len()).unwrap_or(i64::MAX);
    let start = start.max(1);
    let end = end.min(count);
    if start > end {
        return Ok(Vec::new());
    }

    // Both bounds are within 1..=len here.
    let from = usize::try_from(start - 1).unwrap_or_default();
    let to = usize::try_from(end).unwrap_or_default();
    let mut messages = session.fetch_headers(&uid_set(uids[from..to].iter().copied())).await?;
    messages.sort_by_key(|m| m.uid);
    Ok(messages)
}

async fn load_messages(
    session: &mut dyn MailboxSession,
    ctx: &TaskContext<'_>,
    folder: &LocalFolder,
    start: i64,
    end: i64,
) -> Result<()> {
    session.select(&folder.full_name).await?;
    let messages = messages_at(session, start, end).await?;
    debug!(
        "Loaded {} messages from {} ({}..={})",
        messages.len(),
        folder,
        start,
        end
    );
    ctx.emit(SyncEvent::MsgsReceived {
        tag: ctx.tag.clone(),
        folder: folder.clone(),
        messages,
    });
    Ok(())
}

async fn load_messages_to_cache(
    session: &mut dyn MailboxSession,
    ctx: &TaskContext<'_>,
    folder: &LocalFolder,
    already_loaded: u32,
) -> Result<()> {
    let status = session.select(&folder.full_name).await?;
    let end = i64::from(status.exists) - i64::from(already_loaded);
    let start = end - i64::from(ctx.settings.page_size) + 1;

    let messages = if end < 1 {
        Vec::new()
    } else {
        messages_at(session, start, end).await?
    };
    debug!("Loaded {} older messages from {}", messages.len(), folder);
    ctx.emit(SyncEvent::MsgsReceived {
        tag: ctx.tag.clone(),
        folder: folder.clone(),
        messages,
    });
    Ok(())
}

async fn load_message_details(
    session: &mut dyn MailboxSession,
    ctx: &TaskContext<'_>,
    folder: &LocalFolder,
    uid: Uid,
) -> Result<()> {
    session.select(&folder.full_name).await?;
    let raw = session
        .fetch_raw(uid)
        .await?
        .ok_or(Error::MessageRemoved(uid))?;
    ctx.emit(SyncEvent::MsgDetailsReceived {
        tag: ctx.tag.clone(),
        folder: folder.clone(),
        uid,
        raw,
    });
    Ok(())
}

/// The smallest UID a server could still assign after `last_uid`.
/// IMAP UIDs are 32-bit, so nothing follows `u32::MAX`.
fn first_uid_after(last_uid: Uid) -> Option<Uid> {
    last_uid
        .checked_add(1)
        .filter(|uid| *uid <= Uid::from(u32::MAX))
}

async fn load_new_messages(
    session: &mut dyn MailboxSession,
    ctx: &TaskContext<'_>,
    folder: &LocalFolder,
    last_uid: Uid,
) -> Result<()> {
    session.select(&folder.full_name).await?;

    // `n:*` always matches the newest message, even when its UID is
    // below n.
    let newer: Vec<Uid> = match first_uid_after(last_uid) {
        Some(first) => session
            .uid_search(&format!("UID {first}:*"))
            .await?
            .into_iter()
            .filter(|uid| *uid > last_uid)
            .collect(),
        None => Vec::new(),
    };

    let messages = if newer.is_empty() {
        Vec::new()
    } else {
        let local: HashSet<Uid> = ctx
            .store
            .uid_flags(ctx.account, &folder.alias)
            .await?
            .into_keys()
            .collect();
        let fetched = session.fetch_headers(&uid_set(newer)).await?;
        reconcile::insert_candidates(&local, &fetched)
            .into_iter()
            .cloned()
            .collect()
    };

    let encryption_states = encryption_states(session, ctx.settings, &messages).await?;
    debug!("Found {} new messages in {}", messages.len(), folder);
    ctx.emit(SyncEvent::NewMsgsReceived {
        tag: ctx.tag.clone(),
        folder: folder.clone(),
        messages,
        encryption_states,
        notify: ctx.should_notify(folder),
    });
    Ok(())
}

async fn move_messages(
    session: &mut dyn MailboxSession,
    ctx: &TaskContext<'_>,
    source: &LocalFolder,
    destination: &LocalFolder,
    uids: &[Uid],
) -> Result<()> {
    if !uids.is_empty() {
        session.select(&source.full_name).await?;
        session
            .move_messages(&uid_set(uids.iter().copied()), &destination.full_name)
            .await?;
    }
    info!(
        "Moved {} messages from {} to {}",
        uids.len(),
        source,
        destination
    );
    ctx.emit(SyncEvent::MsgsMoved {
        tag: ctx.tag.clone(),
        source: source.clone(),
        destination: destination.clone(),
        uids: uids.to_vec(),
    });
    Ok(())
}

async fn sync_folder(
    session: &mut dyn MailboxSession,
    ctx: &TaskContext<'_>,
    folder: &LocalFolder,
) -> Result<()> {
    let status = session.select(&folder.full_name).await?;
    let remote = if status.exists == 0 {
        Vec::new()
    } else {
        session.fetch_flags("1:*").await?
    };

    let local = ctx.store.uid_flags(ctx.account, &folder.alias).await?;
    let result = reconcile::reconcile(&local, &remote);
    debug!(
        "{}: {} new, {} updated, {} deleted, {} skipped",
        folder,
        result.insert.len(),
        result.update.len(),
        result.delete.len(),
        result.skipped
    );

    let new_msgs = if result.insert.is_empty() {
        Vec::new()
    } else {
        let mut fetched = session
            .fetch_headers(&uid_set(result.insert.iter().copied()))
            .await?;
        fetched.retain(|m| m.uid.is_some_and(|uid| result.insert.contains(&uid)));
        fetched
    };
    let updated_msgs: Vec<RemoteMessage> = remote
        .into_iter()
        .filter(|m| m.uid.is_some_and(|uid| result.update.contains(&uid)))
        .collect();
    let encryption_states = encryption_states(session, ctx.settings, &new_msgs).await?;

    ctx.emit(SyncEvent::RefreshMsgsReceived {
        tag: ctx.tag.clone(),
        folder: folder.clone(),
        new_msgs,
        updated_msgs,
        deleted_uids: result.delete,
        encryption_states,
        notify: ctx.should_notify(folder),
    });
    Ok(())
}

/// Classify each message as PGP encrypted or not.
///
/// Accounts that only show encrypted mail skip the round trip and mark
/// everything encrypted. Messages whose snippet could not be fetched
/// are left out.
async fn encryption_states(
    session: &mut dyn MailboxSession,
    settings: &SyncSettings,
    messages: &[RemoteMessage],
) -> Result<BTreeMap<Uid, bool>> {
    let uids: Vec<Uid> = messages.iter().filter_map(|m| m.uid).collect();
    if settings.show_only_encrypted {
        return Ok(uids.into_iter().map(|uid| (uid, true)).collect());
    }
    if uids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let snippets = session
        .fetch_text_snippets(&uid_set(uids.iter().copied()), ENCRYPTION_SNIPPET_BYTES)
        .await?;
    let states: BTreeMap<Uid, bool> = snippets
        .into_iter()
        .map(|(uid, snippet)| (uid, looks_encrypted(&snippet)))
        .collect();
    if states.len() < uids.len() {
        warn!(
            "No body snippet for {} of {} messages",
            uids.len() - states.len(),
            uids.len()
        );
    }
    Ok(states)
}
