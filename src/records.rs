//! Citation records and the shapes they take through ingestion, storage, and retrieval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;

/// Rejection reason for a malformed `chapter:verse` reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "reference '{0}' must be 'chapter:verse' with both parts positive integers (e.g. '2:22')"
)]
pub struct InvalidReference(pub String);

/// A parsed `chapter:verse` pair. Both parts are positive and written without leading zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference {
    /// Chapter number, starting at 1.
    pub chapter: u64,
    /// Verse number within the chapter, starting at 1.
    pub verse: u64,
}

impl FromStr for Reference {
    type Err = InvalidReference;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidReference(value.to_string());
        let (chapter, verse) = value.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            chapter: parse_positive(chapter).ok_or_else(invalid)?,
            verse: parse_positive(verse).ok_or_else(invalid)?,
        })
    }
}

// `u64::from_str` accepts a leading '+', and leading zeros, so check the digits first.
fn parse_positive(part: &str) -> Option<u64> {
    let starts_nonzero = part.starts_with(|c: char| matches!(c, '1'..='9'));
    if starts_nonzero && part.bytes().all(|b| b.is_ascii_digit()) {
        part.parse().ok()
    } else {
        None
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.verse)
    }
}

/// Check a raw reference string against the `chapter:verse` format.
pub fn validate_reference(value: &str) -> Result<Reference, InvalidReference> {
    value.parse()
}

/// A text fragment tagged with the citation it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    /// `chapter:verse` citation.
    pub reference: String,
    /// Fragment body.
    pub text: String,
}

impl CitationRecord {
    /// Build a record, validating the reference.
    pub fn new(
        reference: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, InvalidReference> {
        let reference = reference.into();
        validate_reference(&reference)?;
        Ok(Self {
            reference,
            text: text.into(),
        })
    }

    /// Empty record standing in for a page the segmentation model returned garbage for.
    pub fn placeholder() -> Self {
        Self {
            reference: String::new(),
            text: String::new(),
        }
    }

    /// Whether this is the empty placeholder record.
    pub fn is_placeholder(&self) -> bool {
        self.reference.is_empty() && self.text.is_empty()
    }

    /// Parsed reference, when the record carries a well-formed one.
    pub fn parsed_reference(&self) -> Result<Reference, InvalidReference> {
        validate_reference(&self.reference)
    }
}

/// A citation record as persisted by a vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// `chapter:verse` citation.
    pub reference: String,
    /// Fragment body.
    pub text: String,
    /// Embedding of `text`.
    pub document_embedding: Vec<f32>,
    /// Insertion time, RFC3339 UTC.
    pub timestamp: String,
}

impl StoredDocument {
    /// Stamp a record with the current time.
    pub fn new(record: CitationRecord, document_embedding: Vec<f32>) -> Self {
        Self {
            reference: record.reference,
            text: record.text,
            document_embedding,
            timestamp: current_timestamp_rfc3339(),
        }
    }

    /// Project the document into a search result carrying `search_score`.
    pub fn to_search_result(&self, search_score: f32) -> SearchResult {
        SearchResult {
            reference: self.reference.clone(),
            text: self.text.clone(),
            search_score,
        }
    }
}

/// A stored document projected without its vector, annotated with a similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// `chapter:verse` citation.
    pub reference: String,
    /// Fragment body.
    pub text: String,
    /// Similarity reported by the store (cosine, higher is closer).
    pub search_score: f32,
}

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user asking questions.
    User,
    /// Model answers.
    Assistant,
    /// Instructions and injected context.
    System,
}

/// One turn of a conversation forwarded to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the message.
    pub role: Role,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Current timestamp formatted for storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
