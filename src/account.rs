//! Mail account records
//!
//! An [`AccountRecord`] is the plaintext that the vault encrypts: one
//! display name plus an IMAP and an SMTP credential pair. The JSON
//! shape is what the boundary layer sends on add/edit.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vault-assigned identifier, unique across the store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl AccountId {
    /// Bytes bound into the ciphertext as associated data.
    #[must_use]
    pub fn to_aad(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse()
            .map(Self)
            .map_err(|_| Error::InvalidArgument(format!("Invalid account id: {s:?}")))
    }
}

/// Transport security for the IMAP connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Plain TCP.
    None,
    /// Implicit TLS from the first byte (usually port 993).
    #[default]
    Ssl,
    /// Plain greeting, then `STARTTLS` upgrade (usually port 143).
    Starttls,
}

/// IMAP half of an account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImapAccount {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub encryption: Encryption,
}

impl Default for ImapAccount {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: String::new(),
            encryption: Encryption::Ssl,
        }
    }
}

impl ImapAccount {
    /// Check that the record can be used to open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty host or port 0.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("imap", &self.host, self.port)
    }

    /// `host:port` for `TcpStream::connect`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ImapAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapAccount")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("encryption", &self.encryption)
            .finish()
    }
}

/// SMTP half of an account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmtpAccount {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub auth_required: bool,
    pub from_email: String,
    pub from_name: String,
}

impl Default for SmtpAccount {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            auth_required: true,
            from_email: String::new(),
            from_name: String::new(),
        }
    }
}

impl SmtpAccount {
    /// Check that the record can be used to send mail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty host, port 0, or
    /// an empty sender address.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("smtp", &self.host, self.port)?;
        if self.from_email.trim().is_empty() {
            return Err(Error::InvalidArgument("smtp.fromEmail is empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for SmtpAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpAccount")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth_required", &self.auth_required)
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .finish()
    }
}

fn validate_endpoint(kind: &str, host: &str, port: u16) -> Result<()> {
    if host.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{kind}.host is empty")));
    }
    if port == 0 {
        return Err(Error::InvalidArgument(format!("{kind}.port is 0")));
    }
    Ok(())
}

/// One mail account: display name plus IMAP and SMTP credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountRecord {
    pub name: String,
    pub imap: ImapAccount,
    pub smtp: SmtpAccount,
}

impl AccountRecord {
    /// Parse a request payload. Absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the bytes are not a JSON
    /// object of the expected shape.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidArgument(format!("Malformed account payload: {e}")))
    }

    pub(crate) fn to_plaintext(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Parse(e.to_string()))
    }

    pub(crate) fn from_plaintext(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))
    }
}

/// A stored record together with its id, as returned by
/// [`crate::CredentialVault::all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: AccountId,
    #[serde(flatten)]
    pub record: AccountRecord,
}
