//! Error taxonomy for the session core.
//!
//! One enum per failure domain. Collaborator errors ([`TransportError`],
//! [`StoreError`], [`ProviderError`], [`DirectoryError`]) are produced by
//! implementations outside this crate and passed through unchanged.

use tessera_proto::{DecodeError, Identity, SessionId};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Connection gating and state machine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation requires a connected transport
    #[error("not connected (state: {state})")]
    NotConnected {
        /// State observed when the operation was refused
        state: ConnectionState,
    },

    /// Event is not valid in the current state
    #[error("invalid transition: {event} while {state}")]
    InvalidTransition {
        /// State when the event arrived
        state: ConnectionState,
        /// Name of the rejected event
        event: &'static str,
    },
}

/// Session resolution and group membership errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No bootstrap or change ticket from `sender` for `session_id` is stored
    #[error("no service message from {sender} for session {session_id}")]
    MissingServiceMessage {
        /// Author of the message that referenced the session
        sender: Identity,
        /// Session the message was encrypted under
        session_id: SessionId,
    },

    /// Group has not been bootstrapped yet
    #[error("channel {channel} has no active group session")]
    NoActiveSession {
        /// Group channel
        channel: Identity,
    },

    /// Another bootstrap, rotation or membership change holds the channel
    #[error("session bootstrap in progress for {channel}")]
    BootstrapInProgress {
        /// Busy channel
        channel: Identity,
    },

    /// Operation only applies to group channels
    #[error("channel {channel} is not a group")]
    NotAGroup {
        /// Single channel that was passed
        channel: Identity,
    },

    /// Channel does not exist in the store
    #[error("unknown channel {channel}")]
    UnknownChannel {
        /// Missing channel
        channel: Identity,
    },

    /// Delivering a service message to one member failed
    #[error("service message to {member} failed: {source}")]
    FanOut {
        /// Member that could not be reached
        member: Identity,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// Session provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Card lookup failure
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Service message bytes could not be parsed
    #[error("service message: {0}")]
    Codec(#[from] DecodeError),
}

impl SessionError {
    /// Returns true if the caller may retry the same operation later.
    ///
    /// Missing service messages are not retried automatically; they need a
    /// new ticket from the sender first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BootstrapInProgress { .. } | Self::FanOut { .. } => true,
            Self::Directory(e) => matches!(e, DirectoryError::Unavailable { .. }),
            _ => false,
        }
    }
}

/// Failures reported by a [`Transport`](crate::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transport has no live connection
    #[error("transport not connected")]
    NotConnected,

    /// Recipient is unknown to the transport
    #[error("recipient {to} unreachable")]
    Unreachable {
        /// Addressed identity
        to: Identity,
    },

    /// Any other transport failure
    #[error("transport failure: {reason}")]
    Failed {
        /// Description from the transport
        reason: String,
    },
}

/// Failures reported by a [`Store`](crate::Store).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced record does not exist
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing record
        what: String,
    },

    /// Storage backend failure
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Failures reported by a [`SessionProvider`](crate::SessionProvider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Handle does not refer to a live session
    #[error("unknown session")]
    UnknownSession,

    /// Ciphertext could not be authenticated or decrypted
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Underlying cause
        reason: String,
    },

    /// Ticket could not be parsed or does not match the session
    #[error("invalid ticket: {reason}")]
    InvalidTicket {
        /// Underlying cause
        reason: String,
    },

    /// Card does not carry a usable public key
    #[error("invalid card for {identity}")]
    InvalidCard {
        /// Owner of the card
        identity: Identity,
    },

    /// Local identity is not part of the session described by a ticket
    #[error("not a member of session {session_id}")]
    NotAMember {
        /// Session the ticket refers to
        session_id: SessionId,
    },

    /// Any other cryptographic failure
    #[error("crypto: {0}")]
    Crypto(String),
}

/// Failures reported by a [`CardDirectory`](crate::CardDirectory).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Identity has no published card
    #[error("no card for {identity}")]
    NotFound {
        /// Looked-up identity
        identity: Identity,
    },

    /// Directory could not be queried
    #[error("directory unavailable: {reason}")]
    Unavailable {
        /// Description from the directory
        reason: String,
    },
}
