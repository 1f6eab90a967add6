//! Encrypted mail account vault with an IMAP mailbox facade
//!
//! A caller identified by a tenant key stores IMAP + SMTP credential
//! pairs in a [`CredentialVault`], sealed under that same key, and then
//! browses, reads, deletes, and sends mail through them:
//!
//! - [`CredentialVault`] keeps [`AccountRecord`]s encrypted at rest
//!   (Argon2id + AES-256-GCM) in any [`Store`].
//! - [`MailboxFacade`] turns single requests into short-lived IMAP
//!   sessions ([`ConnectedSession`] → [`SelectedSession`]).
//! - [`MailService`] ties the two together for a request boundary.

mod account;
mod cipher;
mod config;
mod connection;
mod error;
mod facade;
mod flag;
mod message;
mod sender;
mod service;
mod session;
mod store;
mod vault;

pub use account::{AccountId, AccountRecord, Encryption, ImapAccount, SmtpAccount, VaultEntry};
pub use cipher::{CredentialCipher, KdfParams};
pub use config::{DEFAULT_PAGE_SIZE, FacadeConfig, VaultConfig};
pub use connection::{ImapSession, ImapTransport, TlsPolicy};
pub use error::{Error, Result};
pub use facade::MailboxFacade;
pub use flag::Flag;
pub use message::{AttachmentInfo, HeaderPage, HeaderSummary, Mail, MailboxStatus};
pub use sender::{MailSender, OutgoingMail, build_message};
pub use service::{AccountMailboxes, MailService, decode_mailbox_name, encode_mailbox_name};
pub use session::{ConnectedSession, SelectedSession};
pub use store::{FileStore, MemoryStore, Store};
pub use vault::CredentialVault;
