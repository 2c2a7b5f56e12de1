//! The sync manager: public face of the engine
//!
//! A [`SyncManager`] is constructed explicitly with its collaborators
//! and owns one task queue, at most one running worker, and the sending
//! half of the event channel. Any thread may enqueue work; results
//! arrive on the [`SyncEvent`] receiver returned by [`SyncManager::new`].

use crate::config::SyncSettings;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::event::SyncEvent;
use crate::folder::LocalFolder;
use crate::message::Uid;
use crate::queue::TaskQueue;
use crate::store::MessageStore;
use crate::task::{SyncTask, TaskKind};
use crate::transport::{Connector, SubmissionTransport, TokenProvider};
use crate::worker::SyncWorker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Whether the app is currently in the foreground.
///
/// New-mail notifications are only requested while it is not.
#[derive(Debug, Clone, Default)]
pub struct AppVisibility(Arc<AtomicBool>);

impl AppVisibility {
    pub fn set_foreground(&self, foreground: bool) {
        self.0.store(foreground, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The collaborators a manager runs against.
#[derive(Clone)]
pub struct SyncDeps {
    pub connector: Arc<dyn Connector>,
    pub tokens: Arc<dyn TokenProvider>,
    pub submission: Arc<dyn SubmissionTransport>,
    pub store: Arc<dyn MessageStore>,
    pub settings: SyncSettings,
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Running and not asked to stop.
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.join.is_finished()
    }
}

pub struct SyncManager {
    deps: SyncDeps,
    queue: Arc<TaskQueue<SyncTask>>,
    events: mpsc::UnboundedSender<SyncEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    visibility: AppVisibility,
    worker: Mutex<Option<WorkerHandle>>,
}

impl SyncManager {
    /// Create an idle manager and the receiver for its events.
    ///
    /// No worker runs until [`Self::begin_sync`].
    #[must_use]
    pub fn new(deps: SyncDeps) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            deps,
            queue: Arc::new(TaskQueue::new()),
            events,
            state: Arc::new(state),
            visibility: AppVisibility::default(),
            worker: Mutex::new(None),
        };
        (manager, receiver)
    }

    fn worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the worker.
    ///
    /// With `force_reset`, pending tasks are dropped and the running
    /// worker is cancelled (closing its session) before a fresh one
    /// starts. Without it, this does nothing while a worker is running.
    /// A new worker waits for a cancelled one to finish its current task,
    /// so tasks never run concurrently.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_sync(&self, force_reset: bool) {
        let mut worker = self.worker();

        if force_reset {
            let dropped = self.queue.clear();
            if let Some(old) = worker.as_ref() {
                old.cancel.cancel();
            }
            debug!("Sync reset, dropped {} pending tasks", dropped);
        }

        if worker.as_ref().is_some_and(WorkerHandle::is_active) {
            debug!("Sync worker already running");
            return;
        }

        let previous = worker
            .take()
            .map(|old| old.join)
            .filter(|join| !join.is_finished());
        let cancel = CancellationToken::new();
        let sync_worker = SyncWorker {
            connection: ConnectionManager::with_state(
                Arc::clone(&self.deps.connector),
                Arc::clone(&self.deps.tokens),
                Arc::clone(&self.state),
            ),
            queue: Arc::clone(&self.queue),
            tokens: Arc::clone(&self.deps.tokens),
            submission: Arc::clone(&self.deps.submission),
            store: Arc::clone(&self.deps.store),
            settings: self.deps.settings.clone(),
            visibility: self.visibility.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
            previous,
        };
        *worker = Some(WorkerHandle {
            cancel,
            join: tokio::spawn(sync_worker.run()),
        });
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker().as_ref().is_some_and(WorkerHandle::is_active)
    }

    /// Cancel the worker. A protocol call already in flight finishes
    /// first; queued tasks stay queued for the next worker, which starts
    /// only once this one has exited.
    pub fn disconnect(&self) {
        if let Some(old) = self.worker().as_ref() {
            old.cancel.cancel();
            info!("Sync worker cancelled");
        }
    }

    /// Drop queued tasks that have not started. Returns how many.
    pub fn cancel_all_jobs(&self) -> usize {
        self.queue.clear()
    }

    /// Drop queued work, cancel the worker and wait for it to log out.
    pub async fn stop_sync(&self) {
        self.cancel_all_jobs();
        let handle = self.worker().take();
        if let Some(old) = handle {
            old.cancel.cancel();
            if let Err(e) = old.join.await {
                debug!("Sync worker ended abnormally: {}", e);
            }
        }
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Observe the worker's connection state.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    /// Handle for reporting whether the app is in the foreground.
    #[must_use]
    pub fn visibility(&self) -> AppVisibility {
        self.visibility.clone()
    }

    pub fn enqueue(&self, task: SyncTask) {
        debug!(
            "Queued {} for {}#{}",
            task.kind.name(),
            task.owner_key,
            task.request_code
        );
        self.queue.enqueue(task);
    }

    fn submit(&self, owner_key: &str, request_code: i32, kind: TaskKind) {
        self.enqueue(SyncTask::new(owner_key, request_code, kind));
    }

    pub fn update_labels(&self, owner_key: &str, request_code: i32) {
        self.submit(owner_key, request_code, TaskKind::UpdateLabels);
    }

    pub fn load_messages(
        &self,
        owner_key: &str,
        request_code: i32,
        folder: LocalFolder,
        start: u32,
        end: u32,
    ) {
        self.submit(
            owner_key,
            request_code,
            TaskKind::LoadMessages { folder, start, end },
        );
    }

    pub fn load_message_details(
        &self,
        owner_key: &str,
        request_code: i32,
        folder: LocalFolder,
        uid: Uid,
    ) {
        self.submit(
            owner_key,
            request_code,
            TaskKind::LoadMessageDetails { folder, uid },
        );
    }

    pub fn load_next_messages(
        &self,
        owner_key: &str,
        request_code: i32,
        folder: LocalFolder,
        already_loaded: u32,
    ) {
        self.submit(
            owner_key,
            request_code,
            TaskKind::LoadMessagesToCache {
                folder,
                already_loaded,
            },
        );
    }

    pub fn load_new_messages(
        &self,
        owner_key: &str,
        request_code: i32,
        folder: LocalFolder,
        last_uid: Uid,
    ) {
        self.submit(
            owner_key,
            request_code,
            TaskKind::LoadNewMessages { folder, last_uid },
        );
    }

    pub fn move_messages(
        &self,
        owner_key: &str,
        request_code: i32,
        source: LocalFolder,
        destination: LocalFolder,
        uids: Vec<Uid>,
    ) {
        self.submit(
            owner_key,
            request_code,
            TaskKind::MoveMessages {
                source,
                destination,
                uids,
            },
        );
    }

    pub fn send_message(&self, owner_key: &str, request_code: i32, raw: Vec<u8>) {
        self.submit(owner_key, request_code, TaskKind::SendMessage { raw });
    }

    pub fn sync_folder(&self, owner_key: &str, request_code: i32, folder: LocalFolder) {
        self.submit(owner_key, request_code, TaskKind::SyncFolder { folder });
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().take() {
            worker.cancel.cancel();
        }
    }
}
