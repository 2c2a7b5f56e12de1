//! Lifecycle of the worker's mailbox session
//!
//! The [`ConnectionManager`] is owned by exactly one sync worker and is
//! the only place a session is created, probed, or dropped. Other
//! parties observe liveness through a [`watch`] channel and never touch
//! the session itself.

use crate::error::{Error, Result};
use crate::transport::{Connector, MailboxSession, TokenProvider};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed.
    Failed,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    session: Option<Box<dyn MailboxSession>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, tokens: Arc<dyn TokenProvider>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self::with_state(connector, tokens, Arc::new(state))
    }

    /// A manager publishing into an existing state channel, so
    /// subscribers survive a worker restart.
    pub(crate) fn with_state(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            connector,
            tokens,
            session: None,
            state,
        }
    }

    /// Watch the connection state without touching the session.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Return a live session, reconnecting if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if no valid token can be obtained or the
    /// server rejects it, or the connector's error if the server cannot
    /// be reached.
    pub async fn ensure_connected(&mut self) -> Result<&mut dyn MailboxSession> {
        self.ensure_connected_with(|| {}).await
    }

    /// Like [`Self::ensure_connected`], calling `before_reconnect` when a
    /// new session has to be opened.
    ///
    /// # Errors
    ///
    /// See [`Self::ensure_connected`].
    pub async fn ensure_connected_with<F: FnOnce()>(
        &mut self,
        before_reconnect: F,
    ) -> Result<&mut dyn MailboxSession> {
        let alive = match self.session.as_mut() {
            Some(session) => match session.noop().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Liveness probe failed, reconnecting: {}", e);
                    false
                }
            },
            None => false,
        };

        if !alive {
            self.session = None;
            before_reconnect();
            self.reconnect().await?;
        }

        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(Error::Imap("Session vanished after connect".into())),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let email = self.tokens.email().to_string();
        let opened = match self.tokens.valid_token().await {
            Ok(token) => self.connector.connect(&email, &token).await,
            Err(e) => Err(match e {
                Error::Auth(_) => e,
                other => Error::Auth(format!("Token refresh failed: {other}")),
            }),
        };

        match opened {
            Ok(session) => {
                self.session = Some(session);
                self.set_state(ConnectionState::Connected);
                info!("Mailbox session opened for {}", email);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Drop the session without logging out, after the server stopped
    /// accepting our credentials. A failed state is left as it is.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("Mailbox session invalidated");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Log out best-effort and drop the session.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout().await {
                debug!("Logout failed: {}", e);
            }
            info!("Mailbox session closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }
}
