//! Boundary-facing entry points
//!
//! Everything a request handler needs: resolve `(tenant key, account
//! id)` through the vault, then hand the decrypted credentials to the
//! facade or the sender. A missing account (or a wrong key, which looks
//! the same) comes back as `None` / `false`.

use crate::account::{AccountId, AccountRecord, VaultEntry};
use crate::cipher::CredentialCipher;
use crate::config::{FacadeConfig, VaultConfig};
use crate::error::{Error, Result};
use crate::facade::MailboxFacade;
use crate::message::{HeaderPage, Mail, MailboxStatus};
use crate::sender::{MailSender, OutgoingMail};
use crate::store::{FileStore, Store};
use crate::vault::CredentialVault;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tracing::debug;

/// Mailbox listing for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMailboxes {
    pub id: AccountId,
    pub name: String,
    pub mail_boxes: Vec<MailboxStatus>,
}

/// Decode a mailbox name from its base64 transport form.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the input is not base64 or
/// does not decode to UTF-8.
pub fn decode_mailbox_name(encoded: &str) -> Result<String> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidArgument(format!("Mailbox name is not base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| Error::InvalidArgument("Mailbox name is not UTF-8".into()))
}

/// Encode a mailbox name for transport. Inverse of
/// [`decode_mailbox_name`].
#[must_use]
pub fn encode_mailbox_name(name: &str) -> String {
    BASE64.encode(name)
}

#[derive(Debug)]
pub struct MailService<S = FileStore> {
    vault: CredentialVault<S>,
    facade: MailboxFacade,
    sender: MailSender,
}

impl MailService<FileStore> {
    /// Build a service from [`VaultConfig::from_env`] and
    /// [`FacadeConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Storage`] if either the
    /// configuration or the store file is unusable.
    pub fn from_env() -> Result<Self> {
        let vault_config = VaultConfig::from_env()?;
        let store = FileStore::open(&vault_config.path)?;
        let cipher = CredentialCipher::new(vault_config.kdf)?;
        Ok(Self::new(
            CredentialVault::new(store, cipher),
            FacadeConfig::from_env()?,
        ))
    }
}

impl<S: Store> MailService<S> {
    #[must_use]
    pub fn new(vault: CredentialVault<S>, config: FacadeConfig) -> Self {
        Self {
            sender: MailSender::new(&config),
            facade: MailboxFacade::new(config),
            vault,
        }
    }

    #[must_use]
    pub const fn vault(&self) -> &CredentialVault<S> {
        &self.vault
    }

    #[must_use]
    pub const fn facade(&self) -> &MailboxFacade {
        &self.facade
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store is unavailable.
    pub fn account(&self, key: &str, id: AccountId) -> Result<Option<AccountRecord>> {
        self.vault.one(key, id)
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store is unavailable.
    pub fn accounts(&self, key: &str) -> Result<Vec<VaultEntry>> {
        self.vault.all(key)
    }

    /// Add an account from a raw JSON payload.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a malformed payload (nothing is
    /// stored), [`Error::Storage`] if the store is unavailable.
    pub fn add_account(&self, key: &str, payload: &[u8]) -> Result<AccountId> {
        let record = AccountRecord::from_json(payload)?;
        self.vault.add(key, &record)
    }

    /// Replace an account from a raw JSON payload.
    ///
    /// # Errors
    ///
    /// As [`Self::add_account`].
    pub fn edit_account(&self, key: &str, id: AccountId, payload: &[u8]) -> Result<bool> {
        let record = AccountRecord::from_json(payload)?;
        self.vault.edit(key, id, &record)
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store is unavailable.
    pub fn delete_account(&self, key: &str, id: AccountId) -> Result<bool> {
        self.vault.delete(key, id)
    }

    /// Mailboxes of one account with live counts.
    ///
    /// # Errors
    ///
    /// Connection, authentication, and protocol failures.
    pub async fn mailboxes(&self, key: &str, id: AccountId) -> Result<Option<AccountMailboxes>> {
        let Some(record) = self.lookup(key, id)? else {
            return Ok(None);
        };
        let mail_boxes = self.facade.list_mailboxes_with_status(&record.imap).await?;
        Ok(Some(AccountMailboxes {
            id,
            name: record.name,
            mail_boxes,
        }))
    }

    /// One page of headers. `page` defaults to 1; the page size comes
    /// from the facade config.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for page 0 (before any I/O),
    /// [`Error::MailboxNotFound`], connection and protocol failures.
    pub async fn mail_headers(
        &self,
        key: &str,
        id: AccountId,
        mailbox: &str,
        page: Option<u32>,
    ) -> Result<Option<HeaderPage>> {
        let page = page.unwrap_or(1);
        let page_size = self.facade.config().page_size;
        if page == 0 || page_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "page {page} / page size {page_size} must both be positive"
            )));
        }

        let Some(record) = self.lookup(key, id)? else {
            return Ok(None);
        };
        self.facade
            .list_mail_headers(&record.imap, mailbox, page, page_size)
            .await
            .map(Some)
    }

    /// One full message. `None` if the account or the message is
    /// missing.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxNotFound`], connection and protocol failures.
    pub async fn mail(
        &self,
        key: &str,
        id: AccountId,
        mailbox: &str,
        uid: u32,
    ) -> Result<Option<Mail>> {
        let Some(record) = self.lookup(key, id)? else {
            return Ok(None);
        };
        self.facade.get_mail(&record.imap, mailbox, uid).await
    }

    /// Delete one message. `false` if the account or the message is
    /// missing.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxNotFound`], connection and protocol failures.
    pub async fn delete_mail(
        &self,
        key: &str,
        id: AccountId,
        mailbox: &str,
        uid: u32,
    ) -> Result<bool> {
        let Some(record) = self.lookup(key, id)? else {
            return Ok(false);
        };
        self.facade.delete_mail(&record.imap, mailbox, uid).await
    }

    /// Send through the account's SMTP credentials. `None` if the
    /// account is missing.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for bad addresses, [`Error::Send`]
    /// for delivery failures.
    pub async fn send_mail(
        &self,
        key: &str,
        id: AccountId,
        mail: &OutgoingMail,
    ) -> Result<Option<()>> {
        let Some(record) = self.lookup(key, id)? else {
            return Ok(None);
        };
        self.sender.send(&record.smtp, mail).await.map(Some)
    }

    fn lookup(&self, key: &str, id: AccountId) -> Result<Option<AccountRecord>> {
        let record = self.vault.one(key, id)?;
        if record.is_none() {
            debug!(%id, "No account for presented key");
        }
        Ok(record)
    }
}
