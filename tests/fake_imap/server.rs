//! In-process fake IMAP server
//!
//! ```text
//!   TCP connect
//!       |
//!   "* OK IMAP4rev1 ready"
//!       |
//!   STARTTLS, then the TLS handshake on the same socket
//!       |
//!   LOGIN or AUTHENTICATE XOAUTH2
//!       |
//!   LIST / SELECT / UID SEARCH / UID FETCH / UID STORE / UID COPY /
//!   EXPUNGE / NOOP, in any order
//!       |
//!   LOGOUT
//! ```
//!
//! Commands are parsed with `imap-codec`. Every connection shares one
//! `Mailbox`, so tests can change the folder contents between tasks
//! through [`FakeImapServer::mailbox`].

use super::handlers::{
    FetchItems, StoreArgs, handle_authenticate, handle_capability, handle_expunge, handle_list,
    handle_login, handle_logout, handle_noop, handle_select, handle_uid_copy, handle_uid_fetch,
    handle_uid_search, handle_uid_store,
};
use super::io::{complete, write_line};
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

#[derive(Default)]
struct Counters {
    connections: AtomicUsize,
    logins: AtomicUsize,
}

/// A fake IMAP server on `127.0.0.1` with an OS-assigned port and a
/// freshly generated self-signed certificate.
///
/// The accept loop is aborted when the server is dropped.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    counters: Arc<Counters>,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    pub async fn start(mailbox: Mailbox) -> Self {
        // Several tests race to install the provider; losing is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.cert.der().clone()], key_der.into())
            .expect("build server TLS config");
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let mailbox = Arc::new(Mutex::new(mailbox));
        let counters = Arc::new(Counters::default());

        let handle = {
            let mailbox = Arc::clone(&mailbox);
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    counters.connections.fetch_add(1, Ordering::SeqCst);
                    let acceptor = acceptor.clone();
                    let mailbox = Arc::clone(&mailbox);
                    let counters = Arc::clone(&counters);
                    tokio::spawn(async move {
                        handle_connection(stream, acceptor, &mailbox, &counters).await;
                    });
                }
            })
        };

        Self {
            port,
            mailbox,
            counters,
            handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Shared folder state, for changing the mailbox mid-test.
    pub fn mailbox(&self) -> &Mutex<Mailbox> {
        &self.mailbox
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// Successful LOGIN / AUTHENTICATE exchanges so far.
    pub fn logins(&self) -> usize {
        self.counters.logins.load(Ordering::SeqCst)
    }
}

impl Drop for FakeImapServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Greeting and STARTTLS on the plain socket, then the command loop
/// over TLS.
async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
    counters: &Counters,
) {
    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = line.split_whitespace();
    let tag = parts.next().unwrap_or("*").to_string();
    if !parts
        .next()
        .is_some_and(|cmd| cmd.eq_ignore_ascii_case("STARTTLS"))
    {
        complete(&mut reader, &tag, "BAD Expected STARTTLS").await;
        return;
    }
    complete(&mut reader, &tag, "OK Begin TLS negotiation now").await;

    let Ok(tls_stream) = acceptor.accept(reader.into_inner()).await else {
        return;
    };
    handle_imap_session(tls_stream, mailbox, counters).await;
}

fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Read handlers get a snapshot of the mailbox; write handlers lock it
/// briefly themselves.
#[allow(clippy::too_many_lines)]
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mutex<Mailbox>,
    counters: &Counters,
) {
    let mut reader = BufReader::new(stream);
    let mut selected: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = line.split_whitespace().next().unwrap_or("*").to_string();
            complete(&mut reader, &tag, "BAD Parse error").await;
            continue;
        };
        let tag = command.tag.inner();
        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Capability => handle_capability(tag, &mut reader).await,
            CommandBody::Noop => handle_noop(tag, &mut reader).await,
            CommandBody::Login { .. } => {
                if handle_login(tag, snap.reject_auth, &mut reader).await {
                    counters.logins.fetch_add(1, Ordering::SeqCst);
                }
            }
            CommandBody::Authenticate { .. } => {
                if handle_authenticate(tag, snap.reject_auth, &mut reader).await {
                    counters.logins.fetch_add(1, Ordering::SeqCst);
                }
            }
            CommandBody::List { .. } => handle_list(tag, &snap, &mut reader).await,
            CommandBody::Select { mailbox: mb, .. } => {
                selected = handle_select(tag, &mailbox_name(&mb), &snap, &mut reader).await;
            }
            CommandBody::Search {
                criteria,
                uid: true,
                ..
            } => {
                handle_uid_search(
                    tag,
                    criteria.as_ref(),
                    &snap,
                    selected.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: true,
                ..
            } => {
                handle_uid_fetch(
                    tag,
                    &sequence_set,
                    &FetchItems::parse(&line),
                    &snap,
                    selected.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                ref kind,
                ref response,
                ref flags,
                uid: true,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_uid_store(tag, &args, mailbox, selected.as_deref(), &mut reader).await;
            }
            CommandBody::Copy {
                ref sequence_set,
                mailbox: ref dest,
                uid: true,
                ..
            } => {
                handle_uid_copy(
                    tag,
                    sequence_set,
                    &mailbox_name(dest),
                    mailbox,
                    selected.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected.as_deref(), &mut reader).await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => complete(&mut reader, tag, "BAD Unknown command").await,
        }
    }
}
