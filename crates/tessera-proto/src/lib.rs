//! Tessera wire schemas.
//!
//! Everything that crosses the transport is defined here: the versioned
//! [`Envelope`] around encrypted bytes, the [`MessageContent`] union carried
//! inside v2 envelopes, and the [`ServiceMessage`] control payload used to
//! distribute group session tickets.
//!
//! The codec is pure. Nothing in this crate touches keys or I/O.
//!
//! # Compatibility ladder
//!
//! Writers always emit [`EnvelopeVersion::LATEST`]. Readers dispatch on the
//! version an envelope declares and must keep accepting every version that
//! was ever written. A v1 body is never parsed as v2 or the reverse.

#![forbid(unsafe_code)]

mod content;
mod envelope;
mod error;
mod ids;
mod service;

pub use content::{CONTENT_TAGS, MessageContent};
pub use envelope::{Envelope, EnvelopeVersion, MAX_ENVELOPE_SIZE, decode, encode};
pub use error::DecodeError;
pub use ids::{Identity, MessageId, SessionId};
pub use service::{ServiceKind, ServiceMessage};
