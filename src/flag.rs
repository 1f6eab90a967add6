//! IMAP message flags
//!
//! Standard system flags have dedicated variants; arbitrary keyword
//! flags use the `Keyword` variant. Header summaries carry these so
//! callers do not have to deal with raw `\Seen` strings.

use serde::{Serialize, Serializer};
use std::fmt;

/// An IMAP message flag.
///
/// # Examples
///
/// ```
/// use mail_vault::Flag;
///
/// assert_eq!(Flag::Deleted.as_imap_str(), "\\Deleted");
///
/// let kw = Flag::Keyword("$Important".to_string());
/// assert_eq!(kw.as_imap_str(), "$Important");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message arrived since the last session (`\Recent`).
    Recent,
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// The IMAP wire representation of this flag.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(kw) => kw,
        }
    }

    /// `+FLAGS (...)` argument for a `UID STORE` that adds this flag.
    #[must_use]
    pub fn store_add_query(&self) -> String {
        format!("+FLAGS ({})", self.as_imap_str())
    }
}

impl From<&async_imap::types::Flag<'_>> for Flag {
    fn from(flag: &async_imap::types::Flag<'_>) -> Self {
        use async_imap::types::Flag as Wire;
        match flag {
            Wire::Seen => Self::Seen,
            Wire::Answered => Self::Answered,
            Wire::Flagged => Self::Flagged,
            Wire::Deleted => Self::Deleted,
            Wire::Draft => Self::Draft,
            Wire::Recent => Self::Recent,
            Wire::MayCreate => Self::Keyword("\\*".to_string()),
            Wire::Custom(kw) => Self::Keyword(kw.to_string()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl Serialize for Flag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_imap_str())
    }
}
