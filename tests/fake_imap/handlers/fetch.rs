//! UID FETCH handler.
//!
//! Message data goes out as counted literals, `{len}\r\n` followed by
//! exactly `len` bytes:
//!
//! ```text
//! * 2 FETCH (UID 7 FLAGS (\Seen) BODY[HEADER] {123}
//! <123 bytes of headers>)
//! ```
//!
//! The requested items are read off the raw command line, which is
//! enough for the fixed queries the client sends.

use super::set_contains;
use crate::fake_imap::io::{complete, write_bytes};
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use imap_codec::imap_types::sequence::SequenceSet;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Data items named in a FETCH command.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchItems {
    flags: bool,
    size: bool,
    header: bool,
    text: Option<usize>,
    body: bool,
}

impl FetchItems {
    pub fn parse(line: &str) -> Self {
        let upper = line.to_ascii_uppercase();
        let text = upper.find("BODY.PEEK[TEXT]<0.").map(|pos| {
            upper[pos + "BODY.PEEK[TEXT]<0.".len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(usize::MAX)
        });
        Self {
            flags: upper.contains("FLAGS"),
            size: upper.contains("RFC822.SIZE"),
            header: upper.contains("BODY.PEEK[HEADER]"),
            text,
            body: upper.contains("BODY.PEEK[]") || upper.contains("BODY[]"),
        }
    }
}

fn literal(out: &mut Vec<u8>, name: &str, data: &[u8]) {
    out.extend_from_slice(format!(" {name} {{{}}}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
}

fn render(seq: usize, email: &TestEmail, items: &FetchItems) -> Vec<u8> {
    let mut out = format!("* {seq} FETCH (UID {}", email.uid).into_bytes();
    if items.flags {
        out.extend_from_slice(format!(" FLAGS ({})", email.flags.join(" ")).as_bytes());
    }
    if items.size {
        out.extend_from_slice(format!(" RFC822.SIZE {}", email.raw.len()).as_bytes());
    }
    if items.header {
        literal(&mut out, "BODY[HEADER]", email.header());
    }
    if let Some(max) = items.text {
        let text = email.text();
        literal(&mut out, "BODY[TEXT]<0>", &text[..text.len().min(max)]);
    }
    if items.body {
        literal(&mut out, "BODY[]", &email.raw);
    }
    out.extend_from_slice(b")\r\n");
    out
}

pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    items: &FetchItems,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        complete(stream, tag, "BAD No folder selected").await;
        return;
    };

    let max = folder.max_uid();
    for (idx, email) in folder.emails.iter().enumerate() {
        if !set_contains(sequence_set, email.uid, max) {
            continue;
        }
        if write_bytes(stream, &render(idx + 1, email, items)).await.is_err() {
            return;
        }
    }

    complete(stream, tag, "OK FETCH completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::written;
    use crate::fake_imap::mailbox::MailboxBuilder;

    const RAW: &[u8] = b"Subject: hi\r\n\r\n-----BEGIN PGP MESSAGE-----\r\n";

    async fn run(set: &str, line: &str) -> String {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(3, &["\\Seen"], RAW)
            .email(7, &[], RAW)
            .build();
        let set = SequenceSet::try_from(set).unwrap();
        let (client, server) = tokio::io::duplex(8192);
        let mut stream = BufReader::new(server);
        handle_uid_fetch(
            "A1",
            &set,
            &FetchItems::parse(line),
            &mailbox,
            Some("INBOX"),
            &mut stream,
        )
        .await;
        drop(stream);
        written(client).await
    }

    #[test]
    fn parses_client_queries() {
        let items = FetchItems::parse("A5 UID FETCH 1:* (UID BODY.PEEK[TEXT]<0.2048>)");
        assert_eq!(items.text, Some(2048));
        assert!(!items.flags);

        let items = FetchItems::parse("A6 UID FETCH 4 (UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])");
        assert!(items.flags && items.size && items.header && !items.body);
    }

    #[tokio::test]
    async fn flags_for_a_range_use_sequence_numbers() {
        let output = run("1:*", "A1 UID FETCH 1:* (UID FLAGS)").await;
        assert!(output.contains("* 1 FETCH (UID 3 FLAGS (\\Seen))\r\n"));
        assert!(output.contains("* 2 FETCH (UID 7 FLAGS ())\r\n"));
        assert!(output.ends_with("A1 OK FETCH completed\r\n"));
    }

    #[tokio::test]
    async fn header_is_a_literal() {
        let output = run("7", "A1 UID FETCH 7 (UID BODY.PEEK[HEADER])").await;
        assert!(output.starts_with("* 2 FETCH (UID 7 BODY[HEADER] {15}\r\nSubject: hi\r\n\r\n)"));
    }

    #[tokio::test]
    async fn text_snippet_is_truncated() {
        let output = run("3", "A1 UID FETCH 3 (UID BODY.PEEK[TEXT]<0.5>)").await;
        assert!(output.starts_with("* 1 FETCH (UID 3 BODY[TEXT]<0> {5}\r\n-----)"));
    }

    #[tokio::test]
    async fn unknown_uid_returns_only_ok() {
        let output = run("5", "A1 UID FETCH 5 (UID BODY.PEEK[])").await;
        assert_eq!(output, "A1 OK FETCH completed\r\n");
    }
}
