//! Versioned envelope and the content codec.

use std::fmt;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::{
    content::{CONTENT_TAGS, MessageContent},
    error::DecodeError,
};

/// Largest serialized envelope or plaintext body a reader accepts (16 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Format of the plaintext inside an envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeVersion {
    /// Raw UTF-8 text. Also assumed when the field is absent.
    #[default]
    V1,
    /// Tagged [`MessageContent`] in CBOR
    V2,
}

impl EnvelopeVersion {
    /// Version every writer emits.
    pub const LATEST: Self = Self::V2;
}

impl fmt::Display for EnvelopeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        })
    }
}

/// Encrypted message as it travels over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Session ciphertext of the encoded content
    pub ciphertext: Vec<u8>,
    /// Creation time, Unix milliseconds
    pub date: u64,
    /// Format of the plaintext behind `ciphertext`
    #[serde(default)]
    pub version: EnvelopeVersion,
    /// Independently encrypted auxiliary bytes (photo thumbnail)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Vec<u8>>,
}

impl Envelope {
    /// Latest-version envelope without auxiliary data.
    pub fn new(ciphertext: Vec<u8>, date: u64) -> Self {
        Self { ciphertext, date, version: EnvelopeVersion::LATEST, additional_data: None }
    }

    /// Attach encrypted auxiliary bytes.
    #[must_use]
    pub fn with_additional_data(mut self, data: Vec<u8>) -> Self {
        self.additional_data = Some(data);
        self
    }

    /// Serialize for the transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ciphertext.len() + 32);
        let Ok(()) = ciborium::ser::into_writer(self, &mut buf) else {
            unreachable!("envelope fields always serialize into a Vec");
        };
        buf
    }

    /// Parse transport bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        check_size(bytes)?;
        ciborium::de::from_reader(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

fn check_size(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() > MAX_ENVELOPE_SIZE {
        return Err(DecodeError::TooLarge { size: bytes.len(), max: MAX_ENVELOPE_SIZE });
    }
    Ok(())
}

/// Encode content as the plaintext of a `version` envelope.
///
/// Only text can be written as v1.
pub fn encode(content: &MessageContent, version: EnvelopeVersion) -> Result<Vec<u8>, DecodeError> {
    match (version, content) {
        (EnvelopeVersion::V1, MessageContent::Text { body }) => Ok(body.as_bytes().to_vec()),
        (EnvelopeVersion::V1, other) => {
            Err(DecodeError::Unrepresentable { version, tag: other.tag() })
        },
        (EnvelopeVersion::V2, content) => {
            let mut buf = Vec::new();
            ciborium::ser::into_writer(content, &mut buf)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            Ok(buf)
        },
    }
}

/// Decode the plaintext of a `version` envelope.
pub fn decode(bytes: &[u8], version: EnvelopeVersion) -> Result<MessageContent, DecodeError> {
    check_size(bytes)?;
    match version {
        EnvelopeVersion::V1 => {
            let body = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
            Ok(MessageContent::text(body))
        },
        EnvelopeVersion::V2 => decode_v2(bytes),
    }
}

// Check the tag first so an unknown variant is reported as such rather than
// as a generic parse failure.
fn decode_v2(bytes: &[u8]) -> Result<MessageContent, DecodeError> {
    let value: Value =
        ciborium::de::from_reader(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let tag = value
        .as_map()
        .and_then(|entries| entries.iter().find(|(k, _)| k.as_text() == Some("type")))
        .and_then(|(_, v)| v.as_text())
        .ok_or_else(|| DecodeError::Malformed("missing content type".to_string()))?;

    if !CONTENT_TAGS.contains(&tag) {
        return Err(DecodeError::UnknownVariant(tag.to_string()));
    }

    value.deserialized().map_err(|e| DecodeError::Malformed(e.to_string()))
}
