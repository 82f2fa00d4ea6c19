//! Client configuration.

/// Longest text preview put into a local push notification.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 64;

/// Body of the audit record left for undecryptable messages.
pub const DEFAULT_PLACEHOLDER_BODY: &str = "Message encrypted";

/// Tunables of the message pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Longest text preview in a local push, in characters
    pub preview_max_chars: usize,
    /// Replace every push preview with a generic text
    pub redact_previews: bool,
    /// Placeholder stored when a message cannot be decrypted or decoded
    pub placeholder_body: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            preview_max_chars: DEFAULT_PREVIEW_MAX_CHARS,
            redact_previews: false,
            placeholder_body: DEFAULT_PLACEHOLDER_BODY.to_string(),
        }
    }
}
