//! Standard invariants.

use std::collections::{BTreeSet, HashMap};

use tessera_core::{MessageState, Notification};
use tessera_proto::{Identity, SessionId};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Channels never list the local identity, and `members` and `cards` stay
/// aligned.
pub struct NoSelfMembership;

impl Invariant for NoSelfMembership {
    fn name(&self) -> &'static str {
        "no_self_membership"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for peer in &state.peers {
            for channel in &peer.channels {
                let aligned = channel.members.len() == channel.cards.len()
                    && channel.members.iter().zip(&channel.cards).all(|(m, c)| *m == c.identity);
                if channel.members.contains(&peer.identity) || !aligned {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "peer {}: channel {} has members {:?}",
                            peer.identity, channel.name, channel.members
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Once every send has returned, no outgoing message is still pending and
/// every incoming message is `received`.
pub struct SettledOutgoing;

impl Invariant for SettledOutgoing {
    fn name(&self) -> &'static str {
        "settled_outgoing"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for peer in &state.peers {
            for message in &peer.messages {
                let ok = if message.incoming {
                    message.state == MessageState::Received
                } else {
                    message.state.is_settled() && message.state != MessageState::Received
                };
                if !ok {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "peer {}: message {} (incoming: {}) in state {}",
                            peer.identity, message.id, message.incoming, message.state
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A channel's unread counter equals its number of unread messages.
pub struct UnreadCounts;

impl Invariant for UnreadCounts {
    fn name(&self) -> &'static str {
        "unread_counts"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for peer in &state.peers {
            for channel in &peer.channels {
                let unread = peer
                    .messages
                    .iter()
                    .filter(|m| m.channel == channel.name && m.unread)
                    .count();
                if unread != channel.unread_count as usize {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "peer {}: channel {} counts {} unread, has {unread}",
                            peer.identity, channel.name, channel.unread_count
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every message the UI was told about exists in the store.
pub struct NotifiedIsPersisted;

impl Invariant for NotifiedIsPersisted {
    fn name(&self) -> &'static str {
        "notified_is_persisted"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for peer in &state.peers {
            for notification in &peer.notifications {
                let Notification::MessageArrived(arrived) = notification else {
                    continue;
                };
                if !peer.messages.iter().any(|m| m.id == arrived.id && m.channel == arrived.channel) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "peer {}: notified message {} is not stored",
                            peer.identity, arrived.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Peers on the same group session see the same member set.
pub struct MembershipConsistency;

impl Invariant for MembershipConsistency {
    fn name(&self) -> &'static str {
        "membership_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut views: HashMap<(Identity, SessionId), Vec<(Identity, BTreeSet<Identity>)>> =
            HashMap::new();

        for peer in &state.peers {
            for channel in peer.channels.iter().filter(|c| c.is_group()) {
                let Some(session_id) = channel.session_id else {
                    continue;
                };
                let mut members: BTreeSet<Identity> = channel.members.iter().cloned().collect();
                members.insert(peer.identity.clone());
                views
                    .entry((channel.name.clone(), session_id))
                    .or_default()
                    .push((peer.identity.clone(), members));
            }
        }

        for ((group, session_id), peers) in views {
            let Some((first, expected)) = peers.first() else {
                continue;
            };
            for (peer, members) in &peers[1..] {
                if members != expected {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "group {group} session {session_id:?}: {first} sees {expected:?}, {peer} sees {members:?}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
