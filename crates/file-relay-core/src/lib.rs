use std::borrow::Borrow;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod handle;
mod index;

pub use handle::{HandleSource, RandomHandleSource, DEFAULT_HANDLE_LENGTH};
pub use index::{RebuildReport, RecordIndex};

/// Column names of the record store header row.
pub const STORE_HEADER: [&str; 4] = ["numerical_file_id", "file_id", "file_name", "file_type"];

/// Character window `[start, end)` compared at the head of a content reference.
pub const HEAD_SEGMENT: (usize, usize) = (0, 15);

/// Character window `[start, end)` compared in the tail of a content reference.
pub const TAIL_SEGMENT: (usize, usize) = (44, 68);

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RelayError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("duplicate handle: {0}")]
    DuplicateHandle(Handle),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("scheduled action delivery failed: {0}")]
    ActionDeliveryFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    /// Message shown to the end user of the transport.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Invalid numerical file ID.",
            Self::InvalidRequest(_) => "No valid file found.",
            Self::StoreUnavailable(_) | Self::DuplicateHandle(_) | Self::ActionDeliveryFailed(_) => {
                "Error saving file. Please try again."
            }
        }
    }
}

/// Numeric identifier handed out to users in place of the content reference.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    /// Parse a handle made only of ASCII digits.
    ///
    /// # Errors
    /// Returns `RelayError::NotFound` when the value cannot name any issued handle.
    pub fn parse(value: &str) -> Result<Self, RelayError> {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(RelayError::NotFound(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_digits(digits: String) -> Self {
        Self(digits)
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Handle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Handle {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ContentKind {
    Document,
    Photo,
    Video,
    Unknown,
}

impl ContentKind {
    /// Label written to the `file_type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Photo => "Photo",
            Self::Video => "Video",
            Self::Unknown => "Unknown file type",
        }
    }

    /// Any label other than the three known kinds reads back as `Unknown`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "Document" => Self::Document,
            "Photo" => Self::Photo,
            "Video" => Self::Video,
            _ => Self::Unknown,
        }
    }

    /// Display name used when the upload carries none.
    #[must_use]
    pub fn default_display_name(self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Photo => "Photo",
            Self::Video => "Video",
            Self::Unknown => "Unknown file name",
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub handle: Handle,
    pub content_ref: String,
    pub display_name: String,
    pub content_kind: ContentKind,
}

impl Record {
    /// Fields in store column order.
    #[must_use]
    pub fn to_fields(&self) -> [&str; 4] {
        [self.handle.as_str(), &self.content_ref, &self.display_name, self.content_kind.as_str()]
    }
}

/// Partial content-reference match used for deduplication.
///
/// The query's head window must occur within the stored head window, and the query's
/// tail window must occur within the stored tail window. Windows are counted in
/// characters; a window past the end of a string is empty, and an empty query window
/// matches anything.
#[must_use]
pub fn content_refs_match(query: &str, stored: &str) -> bool {
    let (head_start, head_end) = HEAD_SEGMENT;
    let (tail_start, tail_end) = TAIL_SEGMENT;

    char_window(stored, head_start, head_end).contains(char_window(query, head_start, head_end))
        && char_window(stored, tail_start, tail_end)
            .contains(char_window(query, tail_start, tail_end))
}

/// First record, in iteration order, whose content reference matches `query`.
pub fn find_first_match<'a, I>(records: I, query: &str) -> Option<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    records.into_iter().find(|record| content_refs_match(query, &record.content_ref))
}

/// Head window of a content reference, used to group uploads of the same content.
#[must_use]
pub fn head_segment(content_ref: &str) -> &str {
    char_window(content_ref, HEAD_SEGMENT.0, HEAD_SEGMENT.1)
}

fn char_window(value: &str, start: usize, end: usize) -> &str {
    let byte_offset =
        |chars: usize| value.char_indices().nth(chars).map_or(value.len(), |(offset, _)| offset);
    value.get(byte_offset(start)..byte_offset(end)).unwrap_or("")
}
