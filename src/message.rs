//! Mailbox and message models returned by the facade
//!
//! Header summaries are decoded from `BODY[HEADER]`, full messages from
//! `BODY[]`, both with `mailparse`. Attachment contents are never
//! returned, only their metadata.

use crate::error::{Error, Result};
use crate::flag::Flag;
use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedMail};
use serde::Serialize;

/// One mailbox as listed by `LIST`, with live `STATUS` counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStatus {
    pub name: String,
    pub delimiter: Option<String>,
    pub message_count: u32,
    pub unseen_count: u32,
    /// `false` for `\Noselect` containers, which always report zero
    /// counts.
    pub selectable: bool,
}

/// Envelope-level view of one message, as shown in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSummary {
    pub uid: u32,
    /// Position in the selected mailbox (1 = oldest).
    pub sequence: u32,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub seen: bool,
    pub flags: Vec<Flag>,
    pub size: Option<u32>,
}

/// Server-side facts about a fetched message that are not part of the
/// RFC 5322 text.
#[derive(Debug, Clone, Default)]
pub(crate) struct FetchMeta {
    pub uid: u32,
    pub sequence: u32,
    pub flags: Vec<Flag>,
    pub size: Option<u32>,
}

impl HeaderSummary {
    /// Decode a summary from a raw header block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the header block is malformed.
    pub(crate) fn parse(meta: FetchMeta, raw_headers: &[u8]) -> Result<Self> {
        let (headers, _) =
            mailparse::parse_headers(raw_headers).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Self::from_headers(meta, &headers))
    }

    fn from_headers(meta: FetchMeta, headers: &[MailHeader<'_>]) -> Self {
        let date = headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        Self {
            uid: meta.uid,
            sequence: meta.sequence,
            subject: headers.get_first_value("Subject").unwrap_or_default(),
            from: headers.get_first_value("From").unwrap_or_default(),
            to: headers.get_first_value("To").unwrap_or_default(),
            date,
            message_id: headers.get_first_value("Message-ID"),
            seen: meta.flags.contains(&Flag::Seen),
            flags: meta.flags,
            size: meta.size,
        }
    }
}

/// Metadata of one attachment part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

/// A complete message: headers, decoded bodies, and attachment
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    #[serde(flatten)]
    pub header: HeaderSummary,
    pub cc: String,
    pub reply_to: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
}

impl Mail {
    /// Decode a full RFC 5322 message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the MIME structure cannot be decoded.
    pub(crate) fn parse(meta: FetchMeta, raw: &[u8]) -> Result<Self> {
        let parsed = mailparse::parse_mail(raw).map_err(|e| Error::Parse(e.to_string()))?;

        let mut mail = Self {
            cc: parsed.headers.get_first_value("Cc").unwrap_or_default(),
            reply_to: parsed.headers.get_first_value("Reply-To"),
            header: HeaderSummary::from_headers(meta, &parsed.headers),
            text_body: None,
            html_body: None,
            attachments: Vec::new(),
        };
        mail.collect_parts(&parsed)?;
        Ok(mail)
    }

    fn collect_parts(&mut self, part: &ParsedMail<'_>) -> Result<()> {
        let disposition = part.get_content_disposition();
        let filename = disposition
            .params
            .get("filename")
            .or_else(|| part.ctype.params.get("name"))
            .cloned();

        if disposition.disposition == DispositionType::Attachment || filename.is_some() {
            let body = part
                .get_body_raw()
                .map_err(|e| Error::Parse(e.to_string()))?;
            self.attachments.push(AttachmentInfo {
                filename: filename.unwrap_or_else(|| "unnamed".to_string()),
                content_type: part.ctype.mimetype.clone(),
                size: body.len(),
            });
            return Ok(());
        }

        if part.subparts.is_empty() {
            let slot = match part.ctype.mimetype.as_str() {
                "text/plain" => &mut self.text_body,
                "text/html" => &mut self.html_body,
                _ => return Ok(()),
            };
            if slot.is_none() {
                *slot = Some(part.get_body().map_err(|e| Error::Parse(e.to_string()))?);
            }
            return Ok(());
        }

        for sub in &part.subparts {
            self.collect_parts(sub)?;
        }
        Ok(())
    }
}

/// One page of header summaries plus the pagination metadata the
/// boundary needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderPage {
    pub headers: Vec<HeaderSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total_messages: u32,
}
