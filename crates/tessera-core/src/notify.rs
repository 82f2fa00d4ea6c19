//! Events emitted to the presentation layer.

use tessera_proto::{Identity, MessageContent, MessageId};

use crate::store::{LocalMessageId, MessageState, StoredMessage};

/// Typed UI notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Message landed in the channel the user is looking at
    MessageArrived(StoredMessage),
    /// Unread counters or ordering of the channel list changed
    ChannelListChanged,
    /// Status of a message changed
    MessageStateChanged {
        /// Local record
        id: LocalMessageId,
        /// Transport id, once dispatched
        transport_id: Option<MessageId>,
        /// New state
        state: MessageState,
    },
    /// Ask the platform to show a local notification
    LocalPushRequested {
        /// Redacted content preview
        preview: String,
        /// Message author
        author: Identity,
    },
    /// Call negotiation payload for the call layer; never stored
    CallSignal {
        /// Channel the signal arrived on
        channel: Identity,
        /// Author
        from: Identity,
        /// Answer or ICE candidate
        content: MessageContent,
    },
}

/// Consumer of [`Notification`]s.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification. Must not block.
    fn notify(&self, notification: Notification);
}
