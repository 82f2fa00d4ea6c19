//! Message content carried inside v2 envelopes.

use serde::{Deserialize, Serialize};

/// Every tag a v2 reader accepts, in declaration order.
pub const CONTENT_TAGS: [&str; 6] =
    ["text", "photo", "voice", "call_offer", "call_answer", "ice_candidate"];

/// User-visible content of one message.
///
/// Serialized adjacently tagged: `{"type": <tag>, "payload": {...}}`. Field
/// names are part of the wire contract and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text
    Text {
        /// Message text
        body: String,
    },
    /// Photo uploaded out of band; the thumbnail rides in `additional_data`
    Photo {
        /// Client-chosen media identifier
        identifier: String,
        /// Download URL of the encrypted photo
        url: String,
    },
    /// Voice recording uploaded out of band
    Voice {
        /// Client-chosen media identifier
        identifier: String,
        /// Length in seconds
        duration: f64,
        /// Download URL of the encrypted recording
        url: String,
    },
    /// Call setup offer
    CallOffer {
        /// Session description
        sdp: String,
    },
    /// Answer to a call offer
    CallAnswer {
        /// Session description
        sdp: String,
    },
    /// ICE candidate for an ongoing call
    IceCandidate {
        /// Candidate line
        sdp: String,
        /// Media line index the candidate belongs to
        #[serde(rename = "sdp_m_line_index")]
        line_index: i32,
        /// Media stream id
        #[serde(rename = "sdp_mid", default, skip_serializing_if = "Option::is_none")]
        mid: Option<String>,
    },
}

impl MessageContent {
    /// Text content.
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Wire tag of this variant.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Text { .. } => CONTENT_TAGS[0],
            Self::Photo { .. } => CONTENT_TAGS[1],
            Self::Voice { .. } => CONTENT_TAGS[2],
            Self::CallOffer { .. } => CONTENT_TAGS[3],
            Self::CallAnswer { .. } => CONTENT_TAGS[4],
            Self::IceCandidate { .. } => CONTENT_TAGS[5],
        }
    }

    /// Call negotiation traffic that is delivered but never stored.
    pub const fn is_ephemeral(&self) -> bool {
        matches!(self, Self::CallAnswer { .. } | Self::IceCandidate { .. })
    }
}
