//! Test data model for the fake IMAP server
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, &[], raw_rfc5322_bytes)
//!         .email(2, &["\\Seen"], raw_rfc5322_bytes)
//!     .special_folder("Sent", "\\Sent")
//!     .build();
//! ```

/// Every folder on the fake server plus the auth switch.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
    /// Refuse LOGIN and AUTHENTICATE, as a revoked token would be.
    pub reject_auth: bool,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn get_folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    /// Special-use attribute such as `\Sent`, sent in LIST.
    pub special_use: Option<String>,
    pub uid_validity: u32,
    /// Next UID handed out by APPEND-like operations (COPY here).
    pub uid_next: u32,
    pub emails: Vec<TestEmail>,
}

impl Folder {
    pub fn max_uid(&self) -> u32 {
        self.emails.iter().map(|e| e.uid).max().unwrap_or(0)
    }

    /// Remove a message as if another client had expunged it.
    pub fn remove(&mut self, uid: u32) {
        self.emails.retain(|e| e.uid != uid);
    }

    /// Append a message with the next UID and return that UID.
    pub fn deliver(&mut self, flags: &[&str], raw: &[u8]) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.emails.push(TestEmail::new(uid, flags, raw));
        uid
    }
}

/// One stored message. `flags` holds wire names like `\Seen`.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub flags: Vec<String>,
    pub raw: Vec<u8>,
}

impl TestEmail {
    pub fn new(uid: u32, flags: &[&str], raw: &[u8]) -> Self {
        Self {
            uid,
            flags: flags.iter().map(ToString::to_string).collect(),
            raw: raw.to_vec(),
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    pub fn set_flag(&mut self, flag: &str, on: bool) {
        if on && !self.has_flag(flag) {
            self.flags.push(flag.to_string());
        } else if !on {
            self.flags.retain(|f| !f.eq_ignore_ascii_case(flag));
        }
    }

    /// Everything up to and including the blank line after the headers.
    pub fn header(&self) -> &[u8] {
        self.raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(&self.raw[..], |pos| &self.raw[..pos + 4])
    }

    /// The body after the header block.
    pub fn text(&self) -> &[u8] {
        &self.raw[self.header().len()..]
    }
}

/// Builder for constructing a `Mailbox` step by step.
///
/// `.folder(name)` starts a folder; `.email(..)` adds to the most
/// recent one.
#[derive(Default)]
pub struct MailboxBuilder {
    mailbox: Mailbox,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(self, name: &str) -> Self {
        self.push_folder(name, None)
    }

    pub fn special_folder(self, name: &str, special_use: &str) -> Self {
        self.push_folder(name, Some(special_use.to_string()))
    }

    fn push_folder(mut self, name: &str, special_use: Option<String>) -> Self {
        self.mailbox.folders.push(Folder {
            name: name.to_string(),
            special_use,
            uid_validity: 1,
            uid_next: 1,
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, flags: &[&str], raw: &[u8]) -> Self {
        let folder = self
            .mailbox
            .folders
            .last_mut()
            .expect("call .folder() before .email()");
        folder.emails.push(TestEmail::new(uid, flags, raw));
        folder.uid_next = folder.uid_next.max(uid + 1);
        self
    }

    pub fn reject_auth(mut self) -> Self {
        self.mailbox.reject_auth = true;
        self
    }

    pub fn build(self) -> Mailbox {
        self.mailbox
    }
}

/// A minimal RFC 5322 message.
pub fn make_raw_email(from: &str, to: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 19 Oct 2026 10:00:00 +0000\r\n\
         Message-ID: <{subject}@fake.test>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}"
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_text_split_at_blank_line() {
        let email = TestEmail::new(1, &[], b"Subject: x\r\n\r\nbody");
        assert_eq!(email.header(), b"Subject: x\r\n\r\n");
        assert_eq!(email.text(), b"body");
    }

    #[test]
    fn builder_tracks_uid_next() {
        let mut mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(4, &[], b"a")
            .build();
        let inbox = mailbox.get_folder_mut("INBOX").unwrap();
        assert_eq!(inbox.deliver(&[], b"b"), 5);
        assert_eq!(inbox.max_uid(), 5);
    }

    #[test]
    fn flags_are_case_insensitive() {
        let mut email = TestEmail::new(1, &["\\Seen"], b"");
        assert!(email.has_flag("\\SEEN"));
        email.set_flag("\\seen", false);
        assert!(email.flags.is_empty());
    }
}
