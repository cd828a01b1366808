//! Error type for playlist parsing.

use thiserror::Error;

/// Errors produced by the playlist parser.
///
/// Malformed input fails with a structured error, never a panic.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Attribute list syntax error (unterminated quote, missing `=`, ...).
    #[error("malformed attribute list in #{tag}: {detail}")]
    Attribute {
        /// Tag whose attribute list failed to parse.
        tag: String,
        /// What went wrong.
        detail: String,
    },

    /// A known attribute carried a value that failed its typed conversion.
    #[error("invalid {attribute} value in #{tag}: {value}")]
    AttributeValue {
        /// Tag carrying the attribute.
        tag: String,
        /// Attribute name.
        attribute: &'static str,
        /// The offending value.
        value: String,
    },

    /// The duration field of a duration/title tag is not a number.
    #[error("invalid duration in #{tag}: {value}")]
    Duration {
        /// Tag carrying the duration.
        tag: String,
        /// The offending value.
        value: String,
    },

    /// A segment URL line could not be resolved against the playlist base.
    #[error("cannot resolve segment URL {line:?} against {base}")]
    SegmentUrl {
        /// The raw URL line.
        line: String,
        /// The base URL it was resolved against.
        base: String,
    },
}

impl ParseError {
    /// Creates an attribute-list syntax error.
    pub fn attribute(tag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Attribute {
            tag: tag.into(),
            detail: detail.into(),
        }
    }

    /// Creates a typed-conversion error for a known attribute.
    pub fn attribute_value(
        tag: impl Into<String>,
        attribute: &'static str,
        value: impl Into<String>,
    ) -> Self {
        Self::AttributeValue {
            tag: tag.into(),
            attribute,
            value: value.into(),
        }
    }

    /// Creates a duration parse error.
    pub fn duration(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duration {
            tag: tag.into(),
            value: value.into(),
        }
    }

    /// Creates a segment URL resolution error.
    pub fn segment_url(line: impl Into<String>, base: impl Into<String>) -> Self {
        Self::SegmentUrl {
            line: line.into(),
            base: base.into(),
        }
    }
}
