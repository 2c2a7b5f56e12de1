//! UID SEARCH handler.
//!
//! Understands the keys the sync tasks send (`ALL` and `UID <set>`)
//! plus `SEEN`, `UNSEEN` and the `AND`/`NOT` combinators. Unknown keys
//! match everything.

use super::set_contains;
use crate::fake_imap::io::{complete, write_line};
use crate::fake_imap::mailbox::{Folder, Mailbox, TestEmail};
use imap_codec::imap_types::search::SearchKey;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    criteria: &[SearchKey<'_>],
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        complete(stream, tag, "BAD No folder selected").await;
        return;
    };

    let uids: Vec<String> = folder
        .emails
        .iter()
        .filter(|e| criteria.iter().all(|key| matches_key(folder, e, key)))
        .map(|e| e.uid.to_string())
        .collect();

    let line = if uids.is_empty() {
        "* SEARCH\r\n".to_string()
    } else {
        format!("* SEARCH {}\r\n", uids.join(" "))
    };
    if write_line(stream, &line).await.is_ok() {
        complete(stream, tag, "OK SEARCH completed").await;
    }
}

#[allow(clippy::match_same_arms)]
fn matches_key(folder: &Folder, email: &TestEmail, key: &SearchKey<'_>) -> bool {
    match key {
        SearchKey::All => true,
        SearchKey::Uid(set) => set_contains(set, email.uid, folder.max_uid()),
        SearchKey::Seen => email.has_flag("\\Seen"),
        SearchKey::Unseen => !email.has_flag("\\Seen"),
        SearchKey::And(keys) => keys.as_ref().iter().all(|k| matches_key(folder, email, k)),
        SearchKey::Not(k) => !matches_key(folder, email, k),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::written;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::sequence::SequenceSet;

    fn mailbox() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .email(1, &["\\Seen"], b"a")
            .email(2, &[], b"b")
            .email(4, &[], b"c")
            .build()
    }

    async fn run(criteria: &[SearchKey<'_>], selected: Option<&str>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);
        handle_uid_search("A1", criteria, &mailbox(), selected, &mut stream).await;
        drop(stream);
        written(client).await
    }

    #[tokio::test]
    async fn all_returns_every_uid() {
        let output = run(&[SearchKey::All], Some("INBOX")).await;
        assert!(output.starts_with("* SEARCH 1 2 4\r\n"));
    }

    #[tokio::test]
    async fn uid_range_past_the_end_returns_last() {
        let set = SequenceSet::try_from("9:*").unwrap();
        let output = run(&[SearchKey::Uid(set)], Some("INBOX")).await;
        assert!(output.starts_with("* SEARCH 4\r\n"));
    }

    #[tokio::test]
    async fn unseen_filters_by_flag() {
        let output = run(&[SearchKey::Unseen], Some("INBOX")).await;
        assert!(output.starts_with("* SEARCH 2 4\r\n"));
    }

    #[tokio::test]
    async fn requires_selected_folder() {
        let output = run(&[SearchKey::All], None).await;
        assert_eq!(output, "A1 BAD No folder selected\r\n");
    }
}
