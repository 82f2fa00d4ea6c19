//! Persistent store contract.
//!
//! The core never sees the storage engine, only this query/mutation surface.
//! Implementations must be safe to share across tasks; each method is one
//! atomic operation.

use std::fmt;

use tessera_proto::{Identity, MessageId, ServiceMessage, SessionId};

use crate::{
    channel::{Card, Channel},
    error::StoreError,
};

/// Store-assigned id of a message record.
pub type LocalMessageId = u64;

/// Store-assigned id of a saved service message.
pub type ServiceRecordId = u64;

/// Lifecycle of a message record.
///
/// Outgoing messages start `Pending` and settle exactly once on `Success` or
/// `Failed`. Successful messages may later move to `Delivered` and `Read` as
/// receipts come in. Incoming messages are `Received` and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Persisted, not yet dispatched
    Pending,
    /// Accepted by the transport
    Success,
    /// Could not be sent
    Failed,
    /// Peer's device received it
    Delivered,
    /// Peer read it
    Read,
    /// Incoming message
    Received,
}

impl MessageState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Same-state updates are not transitions.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Success | Self::Failed)
                | (Self::Success, Self::Delivered | Self::Read)
                | (Self::Delivered, Self::Read)
        )
    }

    /// Whether the send attempt has finished.
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Received => "received",
        })
    }
}

/// Persisted form of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Text
    Text {
        /// Message text
        body: String,
    },
    /// Photo with its decrypted thumbnail
    Photo {
        /// Media identifier
        identifier: String,
        /// Download URL
        url: String,
        /// Thumbnail bytes
        thumbnail: Option<Vec<u8>>,
    },
    /// Voice recording
    Voice {
        /// Media identifier
        identifier: String,
        /// Length in seconds
        duration: f64,
        /// Download URL
        url: String,
    },
    /// Call offer record
    Call {
        /// Offer session description
        sdp: String,
    },
    /// Audit record for a message that could not be decrypted or decoded
    Undecryptable {
        /// Text shown in place of the content
        placeholder: String,
    },
}

/// Message to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Channel the message belongs to
    pub channel: Identity,
    /// Author
    pub author: Identity,
    /// Content
    pub body: MessageBody,
    /// Received rather than sent
    pub incoming: bool,
    /// Initial state
    pub state: MessageState,
    /// Counts towards the channel's unread messages
    pub unread: bool,
    /// Unix milliseconds
    pub date: u64,
    /// Transport id, when already known
    pub transport_id: Option<MessageId>,
}

/// Persisted message.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    /// Store id
    pub id: LocalMessageId,
    /// Channel
    pub channel: Identity,
    /// Author
    pub author: Identity,
    /// Content
    pub body: MessageBody,
    /// Received rather than sent
    pub incoming: bool,
    /// Current state
    pub state: MessageState,
    /// Counted as unread
    pub unread: bool,
    /// Unix milliseconds
    pub date: u64,
    /// Transport id, once dispatched or received
    pub transport_id: Option<MessageId>,
}

/// Saved service message awaiting or retained for session materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredServiceMessage {
    /// Store id
    pub id: ServiceRecordId,
    /// Sender
    pub from: Identity,
    /// Decoded message
    pub message: ServiceMessage,
}

/// Outcome of a state update.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// State changed from `previous`
    Applied {
        /// State before the update
        previous: MessageState,
        /// Updated record
        message: StoredMessage,
    },
    /// Update was a duplicate or would regress; record unchanged
    Ignored {
        /// Unchanged record
        message: StoredMessage,
    },
}

/// Query and mutation surface of the persistent store.
pub trait Store: Send + Sync {
    /// Channel by name.
    fn get_channel(&self, name: &Identity) -> Result<Option<Channel>, StoreError>;

    /// Group channel whose current session is `session_id`.
    fn get_channel_by_session(&self, session_id: &SessionId)
    -> Result<Option<Channel>, StoreError>;

    /// Insert `channel` unless one with the same name exists; returns the
    /// stored channel either way.
    fn create_channel(&self, channel: Channel) -> Result<Channel, StoreError>;

    /// Assign or clear a group channel's session id.
    fn set_session_id(
        &self,
        channel: &Identity,
        session_id: Option<SessionId>,
    ) -> Result<(), StoreError>;

    /// Replace a group channel's member cards.
    fn set_members(&self, channel: &Identity, cards: Vec<Card>) -> Result<(), StoreError>;

    /// Zero a channel's unread counter.
    fn reset_unread(&self, channel: &Identity) -> Result<(), StoreError>;

    /// Persist a message; bumps the channel's unread counter when `unread`.
    fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Message by store id.
    fn get_message(&self, id: LocalMessageId) -> Result<Option<StoredMessage>, StoreError>;

    /// Messages of a channel, oldest first.
    fn messages(&self, channel: &Identity) -> Result<Vec<StoredMessage>, StoreError>;

    /// Message by the transport id it was dispatched or received with.
    fn find_message_by_transport_id(
        &self,
        transport_id: &MessageId,
    ) -> Result<Option<StoredMessage>, StoreError>;

    /// Record the transport id of a dispatched message.
    fn attach_transport_id(
        &self,
        id: LocalMessageId,
        transport_id: MessageId,
    ) -> Result<(), StoreError>;

    /// Move a message to `state`.
    ///
    /// Implementations apply the update atomically and only when
    /// [`MessageState::can_transition_to`] allows it; anything else is
    /// reported as [`StateUpdate::Ignored`].
    fn update_message_state(
        &self,
        id: LocalMessageId,
        state: MessageState,
    ) -> Result<StateUpdate, StoreError>;

    /// Persist a received service message.
    fn save_service_message(
        &self,
        from: &Identity,
        message: ServiceMessage,
    ) -> Result<StoredServiceMessage, StoreError>;

    /// Service message from `from` for `session_id` with `identifier`.
    fn find_service_message(
        &self,
        from: &Identity,
        session_id: &SessionId,
        identifier: Option<&str>,
    ) -> Result<Option<StoredServiceMessage>, StoreError>;

    /// All saved service messages for `session_id`, oldest first.
    fn service_messages(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<StoredServiceMessage>, StoreError>;

    /// Remove a saved service message.
    fn delete_service_message(&self, id: ServiceRecordId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const ALL: [MessageState; 6] = [
        MessageState::Pending,
        MessageState::Success,
        MessageState::Failed,
        MessageState::Delivered,
        MessageState::Read,
        MessageState::Received,
    ];

    #[test]
    fn pending_settles_once() {
        assert!(MessageState::Pending.can_transition_to(MessageState::Success));
        assert!(MessageState::Pending.can_transition_to(MessageState::Failed));
        assert!(!MessageState::Success.can_transition_to(MessageState::Failed));
        assert!(!MessageState::Failed.can_transition_to(MessageState::Success));
    }

    #[test]
    fn failed_and_received_are_final() {
        for next in ALL {
            assert!(!MessageState::Failed.can_transition_to(next));
            assert!(!MessageState::Received.can_transition_to(next));
        }
    }

    proptest! {
        /// INVARIANT: no state can be reached again once left.
        #[test]
        fn transitions_never_cycle(a in 0usize..6, b in 0usize..6) {
            let (a, b) = (ALL[a], ALL[b]);
            prop_assert!(!(a.can_transition_to(b) && b.can_transition_to(a)));
            prop_assert!(!a.can_transition_to(a));
        }
    }
}
