//! Error types for mail-vault
//!
//! Expected absence (no account, no message) is never an error: the
//! vault and facade return `Option` / `bool` for those. Everything
//! here is either a caller mistake or an infrastructure fault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Wrong tenant key or a corrupt blob. The vault folds this into
    /// "not found" before it reaches a caller.
    #[error("decryption failed")]
    Decryption,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("mailbox not found: {0}")]
    MailboxNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
