//! The single consumer of a manager's task queue

use crate::config::SyncSettings;
use crate::connection::ConnectionManager;
use crate::error::{Error, ErrorKind};
use crate::event::{Progress, RequestTag, SyncEvent};
use crate::manager::AppVisibility;
use crate::queue::TaskQueue;
use crate::store::MessageStore;
use crate::task::{Channels, SyncTask, TaskContext};
use crate::transport::{SubmissionTransport, TokenProvider};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) struct SyncWorker {
    pub connection: ConnectionManager,
    pub queue: Arc<TaskQueue<SyncTask>>,
    pub tokens: Arc<dyn TokenProvider>,
    pub submission: Arc<dyn SubmissionTransport>,
    pub store: Arc<dyn MessageStore>,
    pub settings: SyncSettings,
    pub visibility: AppVisibility,
    pub events: UnboundedSender<SyncEvent>,
    pub cancel: CancellationToken,
    /// A cancelled predecessor that may still be finishing a task.
    pub previous: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Drain the queue until cancelled, then log out.
    ///
    /// Nothing is dequeued before the previous worker has exited. A
    /// failing task never ends the loop.
    pub(crate) async fn run(mut self) {
        if let Some(previous) = self.previous.take() {
            debug!("Waiting for the previous sync worker to exit");
            if let Err(e) = previous.await {
                debug!("Previous sync worker ended abnormally: {}", e);
            }
        }
        info!("Sync worker started for {}", self.tokens.email());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let task = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                task = self.queue.dequeue() => task,
            };
            self.process(task).await;
        }

        self.connection.disconnect().await;
        info!("Sync worker stopped for {}", self.tokens.email());
    }

    async fn process(&mut self, task: SyncTask) {
        let tag = task.tag();
        debug!(
            "Running {} for {}#{}",
            task.kind.name(),
            tag.owner_key,
            tag.request_code
        );

        let ctx = TaskContext {
            tag: tag.clone(),
            account: self.tokens.email(),
            store: self.store.as_ref(),
            settings: &self.settings,
            visibility: &self.visibility,
            events: &self.events,
            cancel: &self.cancel,
        };
        ctx.progress(Progress::TaskStarted);

        let channels = Channels {
            connection: &mut self.connection,
            submission: self.submission.as_ref(),
            tokens: self.tokens.as_ref(),
        };
        match task.execute(channels, &ctx).await {
            Ok(()) => {
                debug!("Completed {}", task.kind.name());
                ctx.progress(Progress::TaskCompleted);
            }
            Err(e) => self.handle_error(&task, tag, e),
        }
    }

    /// Classify a task failure, report it, and tear the session down
    /// when the credentials stopped working.
    fn handle_error(&mut self, task: &SyncTask, tag: RequestTag, err: Error) {
        let name = task.kind.name();
        if matches!(err, Error::Cancelled) && self.cancel.is_cancelled() {
            debug!("{} abandoned on shutdown", name);
            return;
        }

        let kind = err.kind();
        match kind {
            ErrorKind::MessageRemovedRace => {
                // Nothing left to report; the task still finished.
                debug!("{} skipped: {}", name, err);
                self.send(SyncEvent::Progress {
                    tag,
                    progress: Progress::TaskCompleted,
                });
                return;
            }
            ErrorKind::Auth => {
                error!("{} failed, dropping session: {}", name, err);
                self.connection.invalidate();
            }
            ErrorKind::Protocol => error!("{} failed: {}", name, err),
            ErrorKind::TransientIo => warn!("{} failed: {}", name, err),
        }

        self.send(SyncEvent::Error {
            tag,
            kind,
            error: Arc::new(err),
        });
    }

    fn send(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}
