//! Connection-level commands: CAPABILITY, NOOP, LOGIN, AUTHENTICATE
//! and LOGOUT.
//!
//! Credentials are never checked; `Mailbox::reject_auth` decides.

use crate::fake_imap::io::{complete, write_line};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

pub async fn handle_capability<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(
        stream,
        "* CAPABILITY IMAP4rev1 STARTTLS AUTH=XOAUTH2 UIDPLUS\r\n",
    )
    .await;
    complete(stream, tag, "OK CAPABILITY completed").await;
}

pub async fn handle_noop<S: AsyncRead + AsyncWrite + Unpin>(tag: &str, stream: &mut BufReader<S>) {
    complete(stream, tag, "OK NOOP completed").await;
}

/// Returns whether the session is now authenticated.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    reject: bool,
    stream: &mut BufReader<S>,
) -> bool {
    if reject {
        complete(stream, tag, "NO [AUTHENTICATIONFAILED] Invalid credentials").await;
        return false;
    }
    complete(stream, tag, "OK LOGIN completed").await;
    true
}

/// SASL exchange with a single client response.
///
/// Returns whether the session is now authenticated.
pub async fn handle_authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    reject: bool,
    stream: &mut BufReader<S>,
) -> bool {
    if write_line(stream, "+ \r\n").await.is_err() {
        return false;
    }
    let mut response = String::new();
    if stream.read_line(&mut response).await.unwrap_or(0) == 0 {
        return false;
    }
    handle_login(tag, reject || response.trim().is_empty(), stream).await
}

pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(stream, "* BYE Logging out\r\n").await;
    complete(stream, tag, "OK LOGOUT completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::written;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn capability_advertises_xoauth2() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_capability("A1", &mut stream).await;
        drop(stream);

        let output = written(client).await;
        assert!(output.contains("AUTH=XOAUTH2"));
        assert!(output.ends_with("A1 OK CAPABILITY completed\r\n"));
    }

    #[tokio::test]
    async fn rejected_login_is_no() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        assert!(!handle_login("A2", true, &mut stream).await);
        drop(stream);

        assert!(written(client).await.starts_with("A2 NO [AUTHENTICATIONFAILED]"));
    }

    #[tokio::test]
    async fn authenticate_reads_one_response() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"dXNlcj1tZQ==\r\n").await.unwrap();
        let mut stream = BufReader::new(server);

        assert!(handle_authenticate("A3", false, &mut stream).await);
        drop(stream);

        let output = written(client).await;
        assert_eq!(output, "+ \r\nA3 OK LOGIN completed\r\n");
    }

    #[tokio::test]
    async fn logout_says_bye_first() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_logout("X1", &mut stream).await;
        drop(stream);

        let output = written(client).await;
        assert!(output.find("* BYE").unwrap() < output.find("X1 OK").unwrap());
    }
}
