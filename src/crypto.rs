//! Fixed pool of PGP workers
//!
//! Crypto calls are slow and independent of the mailbox connection, so
//! they run on their own [`CRYPTO_WORKERS`] tasks. Each worker builds
//! its own [`CryptoEngine`] from the pool's factory and never shares it.
//! Work is pulled from one shared [`TaskQueue`].

use crate::error::{Error, Result};
use crate::event::RequestTag;
use crate::queue::TaskQueue;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const CRYPTO_WORKERS: usize = 3;

/// ASCII armor header of an OpenPGP encrypted message.
pub const PGP_MESSAGE_MARKER: &str = "-----BEGIN PGP MESSAGE-----";

/// Whether a body snippet starts or contains an armored PGP message.
#[must_use]
pub fn looks_encrypted(snippet: &[u8]) -> bool {
    let marker = PGP_MESSAGE_MARKER.as_bytes();
    snippet.windows(marker.len()).any(|w| w == marker)
}

/// The PGP primitives, provided by the embedding application.
#[async_trait]
pub trait CryptoEngine: Send {
    async fn encrypt(&mut self, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>>;

    async fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    async fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    async fn verify(&mut self, data: &[u8], signature: &[u8]) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoTask {
    pub tag: RequestTag,
    pub kind: CryptoTaskKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoTaskKind {
    Encrypt {
        plaintext: Vec<u8>,
        recipients: Vec<String>,
    },
    Decrypt {
        ciphertext: Vec<u8>,
    },
    Sign {
        data: Vec<u8>,
    },
    Verify {
        data: Vec<u8>,
        signature: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CryptoEvent {
    Encrypted {
        tag: RequestTag,
        ciphertext: Vec<u8>,
    },
    Decrypted {
        tag: RequestTag,
        plaintext: Vec<u8>,
    },
    Signed {
        tag: RequestTag,
        signature: Vec<u8>,
    },
    Verified {
        tag: RequestTag,
        valid: bool,
    },
    Failed {
        tag: RequestTag,
        #[serde(serialize_with = "display")]
        error: Arc<Error>,
    },
}

impl CryptoEvent {
    #[must_use]
    pub const fn tag(&self) -> &RequestTag {
        match self {
            Self::Encrypted { tag, .. }
            | Self::Decrypted { tag, .. }
            | Self::Signed { tag, .. }
            | Self::Verified { tag, .. }
            | Self::Failed { tag, .. } => tag,
        }
    }
}

fn display<S: serde::Serializer>(
    error: &Arc<Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

pub struct CryptoPool {
    queue: Arc<TaskQueue<CryptoTask>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl CryptoPool {
    /// Spawn [`CRYPTO_WORKERS`] workers, each with an engine from
    /// `factory`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, E>(factory: F) -> (Self, mpsc::UnboundedReceiver<CryptoEvent>)
    where
        F: Fn() -> E,
        E: CryptoEngine + 'static,
    {
        let queue = Arc::new(TaskQueue::new());
        let cancel = CancellationToken::new();
        let (events, receiver) = mpsc::unbounded_channel();

        let workers = (0..CRYPTO_WORKERS)
            .map(|id| {
                let worker = CryptoWorker {
                    id,
                    engine: factory(),
                    queue: Arc::clone(&queue),
                    cancel: cancel.clone(),
                    events: events.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        info!("Started {} crypto workers", CRYPTO_WORKERS);

        (
            Self {
                queue,
                cancel,
                workers,
            },
            receiver,
        )
    }

    pub fn submit(&self, task: CryptoTask) {
        self.queue.enqueue(task);
    }

    /// Drop pending crypto work. Returns how many tasks were dropped.
    pub fn cancel_all(&self) -> usize {
        let dropped = self.queue.clear();
        debug!("Dropped {} pending crypto tasks", dropped);
        dropped
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop every worker after its current task and wait for them.
    pub async fn stop(self) {
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                debug!("Crypto worker ended abnormally: {}", e);
            }
        }
    }
}

struct CryptoWorker<E> {
    id: usize,
    engine: E,
    queue: Arc<TaskQueue<CryptoTask>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<CryptoEvent>,
}

impl<E: CryptoEngine> CryptoWorker<E> {
    async fn run(mut self) {
        debug!("Crypto worker {} started", self.id);
        loop {
            let task = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                task = self.queue.dequeue() => task,
            };
            let event = self.process(task).await;
            if self.events.send(event).is_err() {
                break;
            }
        }
        debug!("Crypto worker {} stopped", self.id);
    }

    async fn process(&mut self, task: CryptoTask) -> CryptoEvent {
        let CryptoTask { tag, kind } = task;
        let result = match kind {
            CryptoTaskKind::Encrypt {
                plaintext,
                recipients,
            } => self
                .engine
                .encrypt(&plaintext, &recipients)
                .await
                .map(|ciphertext| CryptoEvent::Encrypted {
                    tag: tag.clone(),
                    ciphertext,
                }),
            CryptoTaskKind::Decrypt { ciphertext } => self
                .engine
                .decrypt(&ciphertext)
                .await
                .map(|plaintext| CryptoEvent::Decrypted {
                    tag: tag.clone(),
                    plaintext,
                }),
            CryptoTaskKind::Sign { data } => {
                self.engine
                    .sign(&data)
                    .await
                    .map(|signature| CryptoEvent::Signed {
                        tag: tag.clone(),
                        signature,
                    })
            }
            CryptoTaskKind::Verify { data, signature } => self
                .engine
                .verify(&data, &signature)
                .await
                .map(|valid| CryptoEvent::Verified {
                    tag: tag.clone(),
                    valid,
                }),
        };

        result.unwrap_or_else(|e| CryptoEvent::Failed {
            tag,
            error: Arc::new(e),
        })
    }
}
