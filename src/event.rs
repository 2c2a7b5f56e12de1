//! Events the sync worker reports to its owner
//!
//! Every outcome of a task, success or failure, arrives as one
//! [`SyncEvent`] on the manager's channel, tagged with the
//! [`RequestTag`] the caller submitted the task with.

use crate::error::{Error, ErrorKind};
use crate::folder::LocalFolder;
use crate::message::{RemoteMessage, Uid};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Correlates an event with the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RequestTag {
    /// Opaque identity of the caller.
    pub owner_key: String,
    /// Caller-chosen correlation id.
    pub request_code: i32,
}

impl RequestTag {
    #[must_use]
    pub fn new(owner_key: impl Into<String>, request_code: i32) -> Self {
        Self {
            owner_key: owner_key.into(),
            request_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// The session was missing or dead and a reconnect started.
    Connecting,
    Connected,
    TaskStarted,
    TaskCompleted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    FolderInfoReceived {
        tag: RequestTag,
        folders: Vec<LocalFolder>,
    },
    MsgsReceived {
        tag: RequestTag,
        folder: LocalFolder,
        messages: Vec<RemoteMessage>,
    },
    MsgDetailsReceived {
        tag: RequestTag,
        folder: LocalFolder,
        uid: Uid,
        #[serde(serialize_with = "lossy_utf8")]
        raw: Vec<u8>,
    },
    NewMsgsReceived {
        tag: RequestTag,
        folder: LocalFolder,
        messages: Vec<RemoteMessage>,
        encryption_states: BTreeMap<Uid, bool>,
        /// The user should be notified about these messages.
        notify: bool,
    },
    RefreshMsgsReceived {
        tag: RequestTag,
        folder: LocalFolder,
        new_msgs: Vec<RemoteMessage>,
        updated_msgs: Vec<RemoteMessage>,
        deleted_uids: BTreeSet<Uid>,
        encryption_states: BTreeMap<Uid, bool>,
        notify: bool,
    },
    MsgsMoved {
        tag: RequestTag,
        source: LocalFolder,
        destination: LocalFolder,
        uids: Vec<Uid>,
    },
    MsgSent {
        tag: RequestTag,
    },
    Progress {
        tag: RequestTag,
        progress: Progress,
    },
    Error {
        tag: RequestTag,
        kind: ErrorKind,
        #[serde(serialize_with = "display")]
        error: Arc<Error>,
    },
}

impl SyncEvent {
    #[must_use]
    pub const fn tag(&self) -> &RequestTag {
        match self {
            Self::FolderInfoReceived { tag, .. }
            | Self::MsgsReceived { tag, .. }
            | Self::MsgDetailsReceived { tag, .. }
            | Self::NewMsgsReceived { tag, .. }
            | Self::RefreshMsgsReceived { tag, .. }
            | Self::MsgsMoved { tag, .. }
            | Self::MsgSent { tag }
            | Self::Progress { tag, .. }
            | Self::Error { tag, .. } => tag,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

fn lossy_utf8<S: Serializer>(raw: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(raw))
}

fn display<S: Serializer>(error: &Arc<Error>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}
