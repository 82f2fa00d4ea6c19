//! Pipeline errors.

use tessera_core::{
    ConnectionError, LocalMessageId, ProviderError, SessionError, StoreError, TransportError,
};
use tessera_proto::DecodeError;
use thiserror::Error;

/// Decrypted bytes did not yield storable content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// Plaintext did not decode for the envelope's version
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Photo arrived without its thumbnail
    #[error("photo without thumbnail")]
    MissingThumbnail,
}

/// Inbound processing failure.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Transport payload is not an envelope
    #[error("unreadable envelope: {0}")]
    Envelope(#[source] DecodeError),

    /// Message body could not be decrypted
    #[error("decryption failed: {0}")]
    Decrypt(#[source] ProviderError),

    /// Auxiliary data could not be decrypted
    #[error("additional data decryption failed: {0}")]
    AdditionalData(#[source] ProviderError),

    /// Decrypted content is unusable
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Service message payload is not a service message
    #[error("unreadable service message: {0}")]
    Service(#[source] DecodeError),

    /// Session could not be resolved
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Persistence failed; nothing was notified
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Connection event rejected by the state machine
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Outbound send failure.
#[derive(Error, Debug)]
pub enum SendError {
    /// Not connected when the send was attempted or while it was in flight
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Session could not be resolved or bootstrapped
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Content has no encoding in the current envelope version
    #[error(transparent)]
    Encode(#[from] DecodeError),

    /// Session provider refused to encrypt
    #[error("encryption failed: {0}")]
    Encrypt(#[source] ProviderError),

    /// Transport rejected the message
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Send task ended without reporting a result
    #[error("send task aborted")]
    Aborted,
}

impl SendError {
    /// Returns true if sending the same content again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Transport(_) => true,
            Self::Session(e) => e.is_retryable(),
            Self::Encode(_) | Self::Encrypt(_) | Self::Store(_) | Self::Aborted => false,
        }
    }
}

/// A send that ended in the `failed` state.
#[derive(Error, Debug)]
#[error("send failed: {error}")]
pub struct SendFailure {
    /// Local record left in the failed state, if one was created
    pub local_id: Option<LocalMessageId>,
    /// Cause
    #[source]
    pub error: SendError,
}

#[cfg(test)]
mod tests {
    use tessera_core::ConnectionState;

    use super::*;

    #[test]
    fn disconnection_is_retryable() {
        let err = SendError::from(ConnectionError::NotConnected {
            state: ConnectionState::Disconnected,
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn unrepresentable_content_is_not_retryable() {
        let err = SendError::from(DecodeError::NotUtf8);
        assert!(!err.is_retryable());
    }
}
