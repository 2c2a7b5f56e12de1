//! Message metadata exchanged between the server and the local cache

use crate::flag::FlagSet;
use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeaderMap};
use serde::Serialize;
use std::fmt;

/// A server-assigned, per-folder unique message identifier.
///
/// UIDs never decrease within a folder but are not contiguous.
pub type Uid = u64;

/// A mailbox address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.address),
            _ => f.write_str(&self.address),
        }
    }
}

/// Header fields the message list needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub message_id: Option<String>,
    pub subject: String,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub date: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Parse the header block of an RFC 5322 message.
    ///
    /// Unparseable fields are left empty rather than failing the whole
    /// envelope.
    #[must_use]
    pub fn from_header_bytes(raw: &[u8]) -> Self {
        let Ok((headers, _)) = mailparse::parse_headers(raw) else {
            return Self::default();
        };

        let addresses = |name: &str| {
            headers
                .get_first_value(name)
                .map(|value| parse_address_list(&value))
                .unwrap_or_default()
        };

        Self {
            message_id: headers
                .get_first_value("Message-ID")
                .map(|id| id.trim().to_string()),
            subject: headers.get_first_value("Subject").unwrap_or_default(),
            from: addresses("From"),
            to: addresses("To"),
            cc: addresses("Cc"),
            date: headers
                .get_first_value("Date")
                .and_then(|d| mailparse::dateparse(&d).ok())
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        }
    }
}

/// Parse a comma separated address header, flattening groups.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<EmailAddress> {
    let Ok(list) = mailparse::addrparse(value) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push(EmailAddress {
                name: info.display_name.clone(),
                address: info.addr.clone(),
            }),
            MailAddr::Group(group) => {
                out.extend(group.addrs.iter().map(|info| EmailAddress {
                    name: info.display_name.clone(),
                    address: info.addr.clone(),
                }));
            }
        }
    }
    out
}

/// One message as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteMessage {
    /// `None` when the UID could not be read because the message was
    /// expunged while the listing was being fetched.
    pub uid: Option<Uid>,
    pub flags: FlagSet,
    pub envelope: Envelope,
    pub size: Option<u32>,
}

impl RemoteMessage {
    /// A listing entry carrying only UID and flags.
    #[must_use]
    pub fn new(uid: Uid, flags: FlagSet) -> Self {
        Self {
            uid: Some(uid),
            flags,
            envelope: Envelope::default(),
            size: None,
        }
    }

    #[must_use]
    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }
}
