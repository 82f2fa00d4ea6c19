//! Transport contract and the events it delivers.

use async_trait::async_trait;
use tessera_proto::{Identity, MessageId};

use crate::{connection::ConnectionEvent, error::TransportError, store::MessageState};

/// Routing class of an outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// One-to-one chat message
    Chat,
    /// Group chat message, addressed to the group
    Group,
    /// Service message carrying a group session ticket
    Service,
}

/// Upload target returned by [`Transport::request_upload_slot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlot {
    /// Where the encrypted bytes are uploaded
    pub put_url: String,
    /// Where recipients download them from
    pub get_url: String,
}

/// Message delivery capability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `to` and return the id the transport assigned.
    async fn send(
        &self,
        payload: Vec<u8>,
        to: &Identity,
        kind: MessageKind,
    ) -> Result<MessageId, TransportError>;

    /// Tell `to` that their messages were read.
    async fn send_read_receipt(&self, to: &Identity) -> Result<(), TransportError>;

    /// Reserve storage for an out-of-band upload.
    async fn request_upload_slot(
        &self,
        name: &str,
        size: usize,
    ) -> Result<UploadSlot, TransportError>;

    /// Upload `data` to a reserved slot.
    async fn upload(&self, slot: &UploadSlot, data: Vec<u8>) -> Result<(), TransportError>;
}

/// Payload received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Serialized envelope
    pub payload: Vec<u8>,
    /// Author
    pub from: Identity,
    /// Group channel for group messages
    pub group: Option<Identity>,
    /// Transport id of the message
    pub message_id: MessageId,
    /// Routing class
    pub kind: MessageKind,
}

/// Everything a transport reports back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connectivity changed
    Connection(ConnectionEvent),
    /// A payload arrived
    Received(InboundMessage),
    /// A peer acknowledged one of our messages
    Receipt {
        /// Transport id of our message
        message_id: MessageId,
        /// Peer that sent the receipt
        from: Identity,
        /// Delivered or read
        state: MessageState,
    },
}
