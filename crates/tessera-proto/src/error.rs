//! Codec errors.

use thiserror::Error;

use crate::EnvelopeVersion;

/// Failure to decode (or, for outbound content, to represent) a payload.
///
/// Never retried: the same bytes always fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// v1 body was not valid UTF-8
    #[error("v1 body is not valid utf-8")]
    NotUtf8,

    /// v2 body carried a type tag this reader does not know
    #[error("unknown content variant: {0}")]
    UnknownVariant(String),

    /// Bytes did not parse as the expected structure
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Content has no encoding in the requested version
    #[error("{tag} content cannot be written as {version}")]
    Unrepresentable {
        /// Version the caller asked for
        version: EnvelopeVersion,
        /// Tag of the content that did not fit
        tag: &'static str,
    },

    /// Input exceeds the size a reader accepts
    #[error("payload of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Actual size
        size: usize,
        /// Limit
        max: usize,
    },
}
