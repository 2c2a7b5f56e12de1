//! IMAP message flags
//!
//! Provides a strongly-typed enum for IMAP flags instead of raw
//! strings, and [`FlagSet`], the canonical string encoding the local
//! cache stores per message. Reconciliation compares these strings to
//! decide whether a cached message needs a flag update.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// An IMAP message flag.
///
/// System flags (prefixed with `\` in the IMAP protocol) have
/// dedicated variants. User-defined keyword flags use [`Flag::Keyword`].
/// Variant order is the order flags appear in a [`FlagSet`] string.
///
/// # Examples
///
/// ```
/// use cryptmail_sync::Flag;
///
/// assert_eq!(Flag::Seen.as_imap_str(), "\\Seen");
/// assert_eq!(Flag::parse("\\flagged"), Flag::Flagged);
/// assert_eq!(Flag::parse("$Important").as_imap_str(), "$Important");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message arrived since the last session (`\Recent`).
    Recent,
    /// Message has been read (`\Seen`).
    Seen,
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// Parse one flag token. System flags match case-insensitively.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "\\answered" => Self::Answered,
            "\\deleted" => Self::Deleted,
            "\\draft" => Self::Draft,
            "\\flagged" => Self::Flagged,
            "\\recent" => Self::Recent,
            "\\seen" => Self::Seen,
            _ => Self::Keyword(token.to_string()),
        }
    }

    /// The IMAP wire representation of this flag.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Answered => "\\Answered",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Flagged => "\\Flagged",
            Self::Recent => "\\Recent",
            Self::Seen => "\\Seen",
            Self::Keyword(kw) => kw,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

/// The flags of one message.
///
/// Its [`Display`](fmt::Display) form is the canonical string the local
/// cache stores: system flags in a fixed order, then keywords, joined
/// by single spaces. An empty set renders as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct FlagSet(BTreeSet<Flag>);

impl FlagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace separated flag string, such as one stored by
    /// the local cache.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.split_whitespace().map(Flag::parse).collect()
    }

    pub fn insert(&mut self, flag: Flag) -> bool {
        self.0.insert(flag)
    }

    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        self.0.contains(flag)
    }

    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.contains(&Flag::Seen)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    /// Whether a stored flag string describes the same flags.
    ///
    /// Both sides are compared in canonical form, ignoring case.
    #[must_use]
    pub fn matches_stored(&self, stored: &str) -> bool {
        Self::parse(stored)
            .to_string()
            .eq_ignore_ascii_case(&self.to_string())
    }
}

impl FromIterator<Flag> for FlagSet {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(flag.as_imap_str())?;
        }
        Ok(())
    }
}

impl From<FlagSet> for String {
    fn from(flags: FlagSet) -> Self {
        flags.to_string()
    }
}
