//! Tessera session core.
//!
//! Decides which cryptographic session every message uses, bootstraps and
//! rotates group sessions, and tracks whether the transport is connected.
//!
//! # Architecture
//!
//! The core talks to the outside world only through collaborator traits:
//!
//! - [`SessionProvider`]: key material and encrypt/decrypt
//! - [`Store`]: channels, messages and saved service messages
//! - [`Transport`]: delivery, read receipts and upload slots
//! - [`CardDirectory`]: public cards of unknown peers
//! - [`NotificationSink`]: typed events for the presentation layer
//!
//! [`SessionRegistry`] owns the mapping from channels to session handles and
//! implements the group membership protocol on top of those traits.
//! [`ConnectionMonitor`] is the process-wide connection state that gates
//! sends and read receipts.

#![forbid(unsafe_code)]

pub mod channel;
pub mod connection;
pub mod directory;
pub mod env;
pub mod error;
pub mod membership;
pub mod notify;
pub mod provider;
pub mod registry;
pub mod store;
pub mod transport;

pub use channel::{Card, Channel, ChannelKind};
pub use connection::{Connection, ConnectionEvent, ConnectionMonitor, ConnectionState};
pub use directory::CardDirectory;
pub use env::Environment;
pub use error::{
    ConnectionError, DirectoryError, ProviderError, SessionError, StoreError, TransportError,
};
pub use membership::{MembershipChange, ServiceOutcome};
pub use notify::{Notification, NotificationSink};
pub use provider::{GroupTicket, SessionHandle, SessionKey, SessionProvider};
pub use registry::{Collaborators, SessionRegistry};
pub use store::{
    LocalMessageId, MessageBody, MessageState, NewMessage, ServiceRecordId, StateUpdate, Store,
    StoredMessage, StoredServiceMessage,
};
pub use transport::{InboundMessage, MessageKind, Transport, TransportEvent, UploadSlot};
