//! Stateless mailbox operations over per-request IMAP sessions
//!
//! Each method opens its own connection, does one logical operation,
//! and logs out. Nothing is shared between calls, so a stale mailbox
//! selection from an earlier caller can never leak into a later one.
//! If the returned future is dropped mid-flight the session is dropped
//! with it and the socket closes.

use crate::account::ImapAccount;
use crate::config::FacadeConfig;
use crate::connection::{self, TlsPolicy};
use crate::error::{Error, Result};
use crate::message::{HeaderPage, Mail, MailboxStatus};
use crate::session::{ConnectedSession, SelectedSession};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct MailboxFacade {
    config: FacadeConfig,
}

impl MailboxFacade {
    #[must_use]
    pub const fn new(config: FacadeConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// Open and authenticate a session with no mailbox selected.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an unusable account,
    /// [`Error::Connection`] / [`Error::Tls`] / [`Error::Timeout`] for
    /// network trouble, [`Error::Authentication`] for rejected
    /// credentials.
    pub async fn connect(&self, imap: &ImapAccount) -> Result<ConnectedSession> {
        let tls = TlsPolicy {
            accept_invalid_certs: self.config.accept_invalid_certs,
        };
        let session = connection::connect(imap, tls, self.config.connect_timeout).await?;
        Ok(ConnectedSession::new(session, self.config.operation_timeout))
    }

    /// Open a session and select `mailbox`.
    ///
    /// # Errors
    ///
    /// As [`Self::connect`], plus [`Error::MailboxNotFound`].
    pub async fn connect_to_mailbox(
        &self,
        imap: &ImapAccount,
        mailbox: &str,
    ) -> Result<SelectedSession> {
        self.connect(imap).await?.select(mailbox).await
    }

    /// All mailboxes with message and unseen counts.
    ///
    /// # Errors
    ///
    /// As [`Self::connect`], plus protocol failures.
    pub async fn list_mailboxes_with_status(
        &self,
        imap: &ImapAccount,
    ) -> Result<Vec<MailboxStatus>> {
        let mut session = self.connect(imap).await?;
        let mailboxes = session.list_mailboxes_with_status().await?;
        close(session.logout().await);
        Ok(mailboxes)
    }

    /// One page of headers from `mailbox`, newest first, with the
    /// mailbox total.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for page or page size 0 (checked
    /// before connecting), otherwise as [`Self::connect_to_mailbox`].
    pub async fn list_mail_headers(
        &self,
        imap: &ImapAccount,
        mailbox: &str,
        page: u32,
        page_size: u32,
    ) -> Result<HeaderPage> {
        if page == 0 || page_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "page {page} / page size {page_size} must both be positive"
            )));
        }

        let mut session = self.connect_to_mailbox(imap, mailbox).await?;
        let headers = session.list_mail_headers(page, page_size).await?;
        let total_messages = session.number_of_messages();
        close(session.logout().await);

        Ok(HeaderPage {
            headers,
            page,
            page_size,
            total_messages,
        })
    }

    /// One full message, or `None` if `uid` is not in `mailbox`.
    ///
    /// # Errors
    ///
    /// As [`Self::connect_to_mailbox`], plus [`Error::Parse`].
    pub async fn get_mail(
        &self,
        imap: &ImapAccount,
        mailbox: &str,
        uid: u32,
    ) -> Result<Option<Mail>> {
        let mut session = self.connect_to_mailbox(imap, mailbox).await?;
        let mail = session.get_mail(uid).await?;
        close(session.logout().await);
        Ok(mail)
    }

    /// Delete and expunge one message. `false` if `uid` is not in
    /// `mailbox`.
    ///
    /// # Errors
    ///
    /// As [`Self::connect_to_mailbox`].
    pub async fn delete_mail(&self, imap: &ImapAccount, mailbox: &str, uid: u32) -> Result<bool> {
        let mut session = self.connect_to_mailbox(imap, mailbox).await?;
        let deleted = session.delete_mail(uid).await?;
        close(session.logout().await);
        Ok(deleted)
    }
}

/// The operation already completed; a failed LOGOUT only costs us a
/// warning.
fn close(result: Result<()>) {
    if let Err(e) = result {
        warn!("Logout failed: {e}");
    }
}
