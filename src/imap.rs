//! IMAP implementation of the mailbox capability
//!
//! Connects over implicit TLS (Gmail, port 993) or STARTTLS (Proton
//! Bridge, port 143), authenticates with XOAUTH2 or LOGIN, and maps
//! `async-imap` results onto the crate's types.

use crate::config::{AccountConfig, Security};
use crate::error::{Error, Result};
use crate::flag::{Flag, FlagSet};
use crate::folder::LocalFolder;
use crate::message::{Envelope, RemoteMessage, Uid};
use crate::transport::{Connector, FolderStatus, MailboxSession};
use async_imap::Session;
use async_imap::types::{Fetch, Name};
use async_trait::async_trait;
use futures::StreamExt;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

type TlsStream = Compat<tokio_rustls::client::TlsStream<TcpStream>>;

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<TlsStream>;

/// How the connector proves the account's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapAuth {
    /// SASL XOAUTH2 with the provider's access token.
    XOAuth2,
    /// Plain LOGIN, with the token used as the password (bridges and
    /// app passwords).
    Login,
}

/// Opens [`ImapMailbox`] sessions for one account configuration.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: AccountConfig,
    auth: ImapAuth,
}

impl ImapConnector {
    #[must_use]
    pub const fn new(config: AccountConfig) -> Self {
        Self {
            config,
            auth: ImapAuth::XOAuth2,
        }
    }

    #[must_use]
    pub const fn with_auth(mut self, auth: ImapAuth) -> Self {
        self.auth = auth;
        self
    }

    fn tls_connector(&self) -> Result<TlsConnector> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("TLS setup failed: {e}")))?;

        let config = if self.config.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn open_tls(&self) -> Result<async_imap::Client<TlsStream>> {
        let host = &self.config.imap_host;
        let addr = format!("{}:{}", host, self.config.imap_port);
        debug!("Connecting to IMAP server at {}", addr);

        let tcp_stream = TcpStream::connect(&addr).await?;
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
        let connector = self.tls_connector()?;

        match self.config.security {
            Security::Tls => {
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))?;
                let mut client = async_imap::Client::new(tls_stream.compat());

                // AUTHENTICATE would otherwise read the greeting as its
                // continuation request.
                client
                    .read_response()
                    .await
                    .map_err(|e| Error::Imap(format!("Failed to read greeting: {e}")))?;
                Ok(client)
            }
            Security::StartTls => {
                let mut client = async_imap::Client::new(tcp_stream.compat());
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;

                let inner = client.into_inner().into_inner();
                let tls_stream = connector
                    .connect(server_name, inner)
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))?;
                Ok(async_imap::Client::new(tls_stream.compat()))
            }
        }
    }
}

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(&self, email: &str, token: &str) -> Result<Box<dyn MailboxSession>> {
        let client = self.open_tls().await?;

        let session = match self.auth {
            ImapAuth::XOAuth2 => client
                .authenticate("XOAUTH2", XOAuth2::new(email, token))
                .await
                .map_err(|(e, _)| auth_error("XOAUTH2", e))?,
            ImapAuth::Login => client
                .login(email, token)
                .await
                .map_err(|(e, _)| auth_error("LOGIN", e))?,
        };

        info!("Connected to IMAP server {}", self.config.imap_host);
        Ok(Box::new(ImapMailbox::new(session)))
    }
}

/// SASL XOAUTH2 initial response.
struct XOAuth2 {
    response: Vec<u8>,
    sent: bool,
}

impl XOAuth2 {
    fn new(email: &str, token: &str) -> Self {
        Self {
            response: format!("user={email}\x01auth=Bearer {token}\x01\x01").into_bytes(),
            sent: false,
        }
    }
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = Vec<u8>;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        if self.sent {
            // A second challenge carries the server's error details; an
            // empty reply lets it finish with NO.
            Vec::new()
        } else {
            self.sent = true;
            self.response.clone()
        }
    }
}

fn auth_error(mechanism: &str, e: async_imap::error::Error) -> Error {
    match e {
        async_imap::error::Error::Io(io) => Error::Io(io),
        async_imap::error::Error::ConnectionLost => {
            Error::Imap(format!("{mechanism}: connection lost"))
        }
        other => Error::Auth(format!("{mechanism} rejected: {other}")),
    }
}

fn imap_error(context: &str, e: async_imap::error::Error) -> Error {
    match e {
        async_imap::error::Error::Io(io) => Error::Io(io),
        async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
            Error::Protocol(format!("{context}: {msg}"))
        }
        async_imap::error::Error::Parse(p) => Error::Protocol(format!("{context}: {p}")),
        other => Error::Imap(format!("{context}: {other}")),
    }
}

fn to_imap_uid(uid: Uid) -> Result<u32> {
    u32::try_from(uid).map_err(|_| Error::Protocol(format!("UID {uid} out of range")))
}

fn convert_flag(flag: &async_imap::types::Flag<'_>) -> Option<Flag> {
    use async_imap::types::Flag as ImapFlag;
    match flag {
        ImapFlag::Seen => Some(Flag::Seen),
        ImapFlag::Answered => Some(Flag::Answered),
        ImapFlag::Flagged => Some(Flag::Flagged),
        ImapFlag::Deleted => Some(Flag::Deleted),
        ImapFlag::Draft => Some(Flag::Draft),
        ImapFlag::Recent => Some(Flag::Recent),
        ImapFlag::Custom(keyword) => Some(Flag::parse(keyword)),
        _ => None,
    }
}

fn remote_message(fetch: &Fetch) -> RemoteMessage {
    RemoteMessage {
        uid: fetch.uid.map(Uid::from),
        flags: fetch.flags().filter_map(|f| convert_flag(&f)).collect::<FlagSet>(),
        envelope: fetch
            .header()
            .map(Envelope::from_header_bytes)
            .unwrap_or_default(),
        size: fetch.size,
    }
}

/// LIST attribute in wire form, e.g. `\Noselect` or `\Sent`.
fn attribute_name(attribute: &impl std::fmt::Debug) -> String {
    let debug = format!("{attribute:?}");
    debug
        .strip_prefix("Extension(\"")
        .and_then(|rest| rest.strip_suffix("\")"))
        .map_or_else(|| format!("\\{debug}"), |ext| ext.replace("\\\\", "\\"))
}

fn local_folder(name: &Name) -> LocalFolder {
    let full_name = name.name().to_string();
    let alias = if full_name.eq_ignore_ascii_case("INBOX") {
        "INBOX".to_string()
    } else {
        name.delimiter()
            .and_then(|d| full_name.rsplit(d).next())
            .unwrap_or(&full_name)
            .to_string()
    };
    let attributes = name.attributes().iter().map(attribute_name).collect();
    LocalFolder::new(full_name, alias).with_attributes(attributes)
}

/// An authenticated IMAP connection.
pub struct ImapMailbox {
    session: ImapSession,
}

impl ImapMailbox {
    #[must_use]
    pub const fn new(session: ImapSession) -> Self {
        Self { session }
    }

    async fn fetch(&mut self, uid_set: &str, query: &str) -> Result<Vec<Fetch>> {
        let stream = self
            .session
            .uid_fetch(uid_set, query)
            .await
            .map_err(|e| imap_error("UID FETCH", e))?;

        let mut fetches = Vec::new();
        let results: Vec<_> = stream.collect().await;
        for item in results {
            match item {
                Ok(fetch) => fetches.push(fetch),
                Err(e) => warn!("Skipping unreadable FETCH response: {}", e),
            }
        }
        Ok(fetches)
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn noop(&mut self) -> Result<()> {
        self.session
            .noop()
            .await
            .map_err(|e| imap_error("NOOP", e))
    }

    async fn list_folders(&mut self) -> Result<Vec<LocalFolder>> {
        let stream = self
            .session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| imap_error("LIST", e))?;
        let names: Vec<_> = stream.collect().await;

        let mut folders = Vec::new();
        for name in names {
            match name {
                Ok(name) => folders.push(local_folder(&name)),
                Err(e) => warn!("Skipping unreadable LIST response: {}", e),
            }
        }
        Ok(folders)
    }

    async fn select(&mut self, folder: &str) -> Result<FolderStatus> {
        let mailbox = self
            .session
            .select(folder)
            .await
            .map_err(|e| imap_error(&format!("SELECT {folder}"), e))?;
        Ok(FolderStatus {
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
            uid_next: mailbox.uid_next.map(Uid::from),
        })
    }

    async fn uid_search(&mut self, query: &str) -> Result<Vec<Uid>> {
        let found = self
            .session
            .uid_search(query)
            .await
            .map_err(|e| imap_error("UID SEARCH", e))?;
        let mut uids: Vec<Uid> = found.into_iter().map(Uid::from).collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_flags(&mut self, uid_set: &str) -> Result<Vec<RemoteMessage>> {
        let fetches = self.fetch(uid_set, "(UID FLAGS)").await?;
        Ok(fetches.iter().map(remote_message).collect())
    }

    async fn fetch_headers(&mut self, uid_set: &str) -> Result<Vec<RemoteMessage>> {
        let fetches = self
            .fetch(uid_set, "(UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])")
            .await?;
        Ok(fetches.iter().map(remote_message).collect())
    }

    async fn fetch_text_snippets(
        &mut self,
        uid_set: &str,
        max_bytes: u32,
    ) -> Result<Vec<(Uid, Vec<u8>)>> {
        let fetches = self
            .fetch(uid_set, &format!("(UID BODY.PEEK[TEXT]<0.{max_bytes}>)"))
            .await?;
        Ok(fetches
            .iter()
            .filter_map(|f| Some((Uid::from(f.uid?), f.text().unwrap_or_default().to_vec())))
            .collect())
    }

    async fn fetch_raw(&mut self, uid: Uid) -> Result<Option<Vec<u8>>> {
        let wanted = to_imap_uid(uid)?;
        let fetches = self.fetch(&wanted.to_string(), "(UID BODY.PEEK[])").await?;
        Ok(fetches
            .iter()
            .find(|f| f.uid == Some(wanted))
            .and_then(Fetch::body)
            .map(<[u8]>::to_vec))
    }

    async fn move_messages(&mut self, uid_set: &str, destination: &str) -> Result<()> {
        self.session
            .uid_copy(uid_set, destination)
            .await
            .map_err(|e| imap_error(&format!("UID COPY to {destination}"), e))?;

        let stored: Vec<_> = self
            .session
            .uid_store(uid_set, "+FLAGS.SILENT (\\Deleted)")
            .await
            .map_err(|e| imap_error("UID STORE", e))?
            .collect()
            .await;
        debug!("Marked {} responses deleted", stored.len());

        let expunged: Vec<_> = self
            .session
            .expunge()
            .await
            .map_err(|e| imap_error("EXPUNGE", e))?
            .collect()
            .await;
        debug!("Expunged {} messages", expunged.len());
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .await
            .map_err(|e| imap_error("LOGOUT", e))
    }
}

/// Certificate verifier that accepts all certificates
/// (self-signed bridge certificates and test servers).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
