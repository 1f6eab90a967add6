//! Type-state handles over one authenticated IMAP connection
//!
//! ```text
//! connect ──> ConnectedSession ──select──> SelectedSession
//!                  │                          │   │
//!                  │                          │   └─select──> SelectedSession
//!                  └──────── logout <─────────┘
//! ```
//!
//! Mailbox enumeration lives on [`ConnectedSession`]; header listing,
//! fetch, and delete live on [`SelectedSession`] only, so they cannot be
//! called before a mailbox is selected. Every protocol method takes
//! `&mut self` or `self`, so one handle never has two commands in
//! flight. Dropping a handle closes its socket.

use crate::connection::{ImapSession, bounded};
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::message::{FetchMeta, HeaderSummary, Mail, MailboxStatus};
use async_imap::types::{Fetch, NameAttribute};
use futures::TryStreamExt;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const HEADER_QUERY: &str = "(UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])";
const MESSAGE_QUERY: &str = "(UID FLAGS RFC822.SIZE BODY.PEEK[])";
const STATUS_QUERY: &str = "(MESSAGES UNSEEN)";

fn imap_error(step: &'static str) -> impl Fn(async_imap::error::Error) -> Error {
    move |e| match e {
        async_imap::error::Error::Io(io) => Error::Connection(format!("{step}: {io}")),
        async_imap::error::Error::ConnectionLost => {
            Error::Connection(format!("{step}: connection lost"))
        }
        other => Error::Imap(format!("{step} failed: {other}")),
    }
}

/// Sequence range `(lo, hi)` covering page `page` (1-based) of a
/// mailbox with `total` messages, newest first. `None` past the end.
pub(crate) fn page_bounds(total: u32, page: u32, page_size: u32) -> Option<(u32, u32)> {
    let skip = page.checked_sub(1)?.checked_mul(page_size)?;
    if page_size == 0 || skip >= total {
        return None;
    }
    let hi = total - skip;
    let lo = hi.saturating_sub(page_size) + 1;
    Some((lo, hi))
}

/// Authenticated, no mailbox selected.
pub struct ConnectedSession {
    inner: ImapSession,
    op_timeout: Duration,
}

impl ConnectedSession {
    pub(crate) const fn new(inner: ImapSession, op_timeout: Duration) -> Self {
        Self { inner, op_timeout }
    }

    /// Every mailbox visible to the account, each with live
    /// `MESSAGES` / `UNSEEN` counts. Does not select anything.
    ///
    /// # Errors
    ///
    /// Returns an error if LIST or STATUS fails or times out.
    pub async fn list_mailboxes_with_status(&mut self) -> Result<Vec<MailboxStatus>> {
        let inner = &mut self.inner;
        let names = bounded(self.op_timeout, "list", async {
            let stream = inner
                .list(Some(""), Some("*"))
                .await
                .map_err(imap_error("LIST"))?;
            stream
                .try_collect::<Vec<_>>()
                .await
                .map_err(imap_error("LIST"))
        })
        .await?;

        let mut mailboxes = Vec::with_capacity(names.len());
        for name in &names {
            let selectable = !name
                .attributes()
                .iter()
                .any(|a| matches!(a, NameAttribute::NoSelect));

            let (message_count, unseen_count) = if selectable {
                let status = bounded(self.op_timeout, "status", async {
                    inner
                        .status(name.name(), STATUS_QUERY)
                        .await
                        .map_err(imap_error("STATUS"))
                })
                .await?;
                (status.exists, status.unseen.unwrap_or(0))
            } else {
                (0, 0)
            };

            mailboxes.push(MailboxStatus {
                name: name.name().to_string(),
                delimiter: name.delimiter().map(ToString::to_string),
                message_count,
                unseen_count,
                selectable,
            });
        }

        debug!(count = mailboxes.len(), "Listed mailboxes");
        Ok(mailboxes)
    }

    /// SELECT `mailbox`, caching its message count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MailboxNotFound`] if the server refuses the
    /// name; the connection is closed in that case.
    pub async fn select(self, mailbox: &str) -> Result<SelectedSession> {
        SelectedSession::open(self.inner, self.op_timeout, mailbox).await
    }

    /// Log out and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if LOGOUT fails or times out.
    pub async fn logout(self) -> Result<()> {
        logout(self.inner, self.op_timeout).await
    }
}

impl fmt::Debug for ConnectedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedSession").finish_non_exhaustive()
    }
}

/// Authenticated with one mailbox selected.
pub struct SelectedSession {
    inner: ImapSession,
    op_timeout: Duration,
    mailbox: String,
    exists: u32,
}

impl SelectedSession {
    async fn open(mut inner: ImapSession, op_timeout: Duration, mailbox: &str) -> Result<Self> {
        let session = &mut inner;
        let selected = bounded(op_timeout, "select", async {
            session.select(mailbox).await.map_err(|e| match e {
                async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                    Error::MailboxNotFound(format!("{mailbox}: {msg}"))
                }
                other => imap_error("SELECT")(other),
            })
        })
        .await?;

        info!(mailbox, exists = selected.exists, "Selected mailbox");
        Ok(Self {
            inner,
            op_timeout,
            mailbox: mailbox.to_string(),
            exists: selected.exists,
        })
    }

    /// Name of the selected mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Message count of the selected mailbox, as of SELECT and adjusted
    /// by our own expunges.
    #[must_use]
    pub const fn number_of_messages(&self) -> u32 {
        self.exists
    }

    /// Switch to another mailbox. The count is re-read from the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MailboxNotFound`] if the server refuses the name.
    pub async fn select(self, mailbox: &str) -> Result<Self> {
        Self::open(self.inner, self.op_timeout, mailbox).await
    }

    /// Page `page` (1-based) of header summaries, newest first.
    ///
    /// A page past the end is an empty `Vec`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `page` or `page_size` is 0,
    /// before anything is sent to the server.
    pub async fn list_mail_headers(
        &mut self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<HeaderSummary>> {
        if page == 0 {
            return Err(Error::InvalidArgument("page must be at least 1".into()));
        }
        if page_size == 0 {
            return Err(Error::InvalidArgument("page size must be positive".into()));
        }

        let Some((lo, hi)) = page_bounds(self.exists, page, page_size) else {
            debug!(page, total = self.exists, "Page past end of mailbox");
            return Ok(Vec::new());
        };

        let inner = &mut self.inner;
        let fetches = bounded(self.op_timeout, "fetch headers", async {
            let stream = inner
                .fetch(format!("{lo}:{hi}"), HEADER_QUERY)
                .await
                .map_err(imap_error("FETCH"))?;
            stream
                .try_collect::<Vec<Fetch>>()
                .await
                .map_err(imap_error("FETCH"))
        })
        .await?;

        let mut headers = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            if !(lo..=hi).contains(&fetch.message) {
                continue;
            }
            let (Some(meta), Some(raw)) = (fetch_meta(fetch), fetch.header()) else {
                warn!(seq = fetch.message, "FETCH response without UID or header");
                continue;
            };
            headers.push(HeaderSummary::parse(meta, raw)?);
        }
        headers.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        debug!(page, lo, hi, returned = headers.len(), "Listed headers");
        Ok(headers)
    }

    /// Fetch one full message by UID without setting `\Seen`.
    ///
    /// Returns `None` if the UID does not exist in this mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for UID 0, [`Error::Parse`] if
    /// the message cannot be decoded, or a network error.
    pub async fn get_mail(&mut self, uid: u32) -> Result<Option<Mail>> {
        check_uid(uid)?;

        let inner = &mut self.inner;
        let fetches = bounded(self.op_timeout, "fetch message", async {
            let stream = inner
                .uid_fetch(uid.to_string(), MESSAGE_QUERY)
                .await
                .map_err(imap_error("UID FETCH"))?;
            stream
                .try_collect::<Vec<Fetch>>()
                .await
                .map_err(imap_error("UID FETCH"))
        })
        .await?;

        let found = fetches.iter().find_map(|fetch| {
            let meta = fetch_meta(fetch).filter(|m| m.uid == uid)?;
            fetch.body().map(|body| (meta, body))
        });

        match found {
            Some((meta, body)) => Mail::parse(meta, body).map(Some),
            None => {
                debug!(uid, mailbox = %self.mailbox, "No such message");
                Ok(None)
            }
        }
    }

    /// Flag one message `\Deleted` and expunge.
    ///
    /// With UIDPLUS the expunge is `UID EXPUNGE` of this UID alone.
    /// Otherwise it falls back to plain `EXPUNGE`, which also removes
    /// any other message already flagged `\Deleted` in the mailbox; the
    /// cached count drops by everything the server reports removed.
    ///
    /// Returns `false` if the UID does not exist in this mailbox. `true`
    /// is only returned once the server acknowledged the expunge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for UID 0, or a network error.
    pub async fn delete_mail(&mut self, uid: u32) -> Result<bool> {
        check_uid(uid)?;

        let inner = &mut self.inner;
        let stored = bounded(self.op_timeout, "store", async {
            let stream = inner
                .uid_store(uid.to_string(), Flag::Deleted.store_add_query())
                .await
                .map_err(imap_error("UID STORE"))?;
            stream
                .try_collect::<Vec<Fetch>>()
                .await
                .map_err(imap_error("UID STORE"))
        })
        .await?;

        if !stored.iter().any(|f| f.uid == Some(uid)) {
            debug!(uid, mailbox = %self.mailbox, "Nothing to delete");
            return Ok(false);
        }

        let uidplus = bounded(self.op_timeout, "capability", async {
            inner
                .capabilities()
                .await
                .map(|caps| caps.has_str("UIDPLUS"))
                .map_err(imap_error("CAPABILITY"))
        })
        .await?;

        let expunged = bounded(self.op_timeout, "expunge", async {
            if uidplus {
                let stream = inner
                    .uid_expunge(uid.to_string())
                    .await
                    .map_err(imap_error("UID EXPUNGE"))?;
                stream
                    .try_collect::<Vec<u32>>()
                    .await
                    .map_err(imap_error("UID EXPUNGE"))
            } else {
                let stream = inner.expunge().await.map_err(imap_error("EXPUNGE"))?;
                stream
                    .try_collect::<Vec<u32>>()
                    .await
                    .map_err(imap_error("EXPUNGE"))
            }
        })
        .await?;

        let removed = u32::try_from(expunged.len()).unwrap_or(u32::MAX);
        self.exists = self.exists.saturating_sub(removed);

        info!(uid, mailbox = %self.mailbox, removed, uidplus, "Deleted message");
        Ok(true)
    }

    /// Log out and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if LOGOUT fails or times out.
    pub async fn logout(self) -> Result<()> {
        logout(self.inner, self.op_timeout).await
    }
}

impl fmt::Debug for SelectedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedSession")
            .field("mailbox", &self.mailbox)
            .field("exists", &self.exists)
            .finish_non_exhaustive()
    }
}

fn check_uid(uid: u32) -> Result<()> {
    if uid == 0 {
        return Err(Error::InvalidArgument("message uid must be positive".into()));
    }
    Ok(())
}

fn fetch_meta(fetch: &Fetch) -> Option<FetchMeta> {
    Some(FetchMeta {
        uid: fetch.uid?,
        sequence: fetch.message,
        flags: fetch.flags().map(|f| Flag::from(&f)).collect(),
        size: fetch.size,
    })
}

async fn logout(mut inner: ImapSession, op_timeout: Duration) -> Result<()> {
    bounded(op_timeout, "logout", async {
        inner.logout().await.map_err(imap_error("LOGOUT"))
    })
    .await
}
