//! Account and sync configuration

use crate::error::{Error, Result};
use std::env;
use std::str::FromStr;

/// How the IMAP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (port 993).
    Tls,
    /// Plain TCP upgraded with STARTTLS (port 143, Proton Bridge).
    StartTls,
}

impl FromStr for Security {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tls" | "ssl" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::Config(format!("Invalid IMAP_SECURITY: {other}"))),
        }
    }
}

/// Connection settings for one mail account
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub email: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub security: Security,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Skip certificate verification (self-signed bridges, tests).
    pub accept_invalid_certs: bool,
}

impl AccountConfig {
    /// Gmail defaults for `email`.
    #[must_use]
    pub fn gmail(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            security: Security::Tls,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            accept_invalid_certs: false,
        }
    }

    /// Load account configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `MAIL_EMAIL`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `imap.gmail.com`)
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_SECURITY` (`tls` or `starttls`, default: `tls`)
    /// - `SMTP_HOST` (default: `smtp.gmail.com`)
    /// - `SMTP_PORT` (default: `465`)
    /// - `MAIL_ACCEPT_INVALID_CERTS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let email =
            env::var("MAIL_EMAIL").map_err(|_| Error::Config("MAIL_EMAIL not set".into()))?;
        let defaults = Self::gmail(email);

        Ok(Self {
            imap_host: env::var("IMAP_HOST").unwrap_or(defaults.imap_host),
            imap_port: parse_var("IMAP_PORT", defaults.imap_port)?,
            security: parse_var("IMAP_SECURITY", defaults.security)?,
            smtp_host: env::var("SMTP_HOST").unwrap_or(defaults.smtp_host),
            smtp_port: parse_var("SMTP_PORT", defaults.smtp_port)?,
            accept_invalid_certs: parse_var("MAIL_ACCEPT_INVALID_CERTS", false)?,
            email: defaults.email,
        })
    }
}

/// Tunables for the sync tasks
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// How many older messages one "load next page" task fetches.
    pub page_size: u32,
    /// The account only shows encrypted mail, so new messages are
    /// assumed encrypted without fetching a body snippet.
    pub show_only_encrypted: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            show_only_encrypted: false,
        }
    }
}

impl SyncSettings {
    /// Reads `SYNC_PAGE_SIZE` and `SYNC_ONLY_ENCRYPTED`, falling back to
    /// the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let page_size = parse_var("SYNC_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(Error::Config("SYNC_PAGE_SIZE must be positive".into()));
        }

        Ok(Self {
            page_size,
            show_only_encrypted: parse_var("SYNC_ONLY_ENCRYPTED", defaults.show_only_encrypted)?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
