//! Observable state of simulated peers.

use tessera_core::{Channel, Notification, StoredMessage};
use tessera_proto::Identity;

use crate::SimPeer;

/// What one peer's store and sink show.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    /// Local identity
    pub identity: Identity,
    /// Channel the user is looking at
    pub active_channel: Option<Identity>,
    /// Every channel
    pub channels: Vec<Channel>,
    /// Every message
    pub messages: Vec<StoredMessage>,
    /// Every notification emitted so far
    pub notifications: Vec<Notification>,
}

impl PeerSnapshot {
    /// Capture `peer`'s current state.
    pub fn capture(peer: &SimPeer) -> Self {
        Self {
            identity: peer.identity().clone(),
            active_channel: peer.client.context().active_channel(),
            channels: peer.store.channels(),
            messages: peer.store.all_messages(),
            notifications: peer.sink.notifications(),
        }
    }
}

/// State of every peer in a simulation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemSnapshot {
    /// Per-peer state
    pub peers: Vec<PeerSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot without peers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture every peer in `peers`.
    pub fn capture(peers: &[&SimPeer]) -> Self {
        Self { peers: peers.iter().map(|p| PeerSnapshot::capture(p)).collect() }
    }
}
