//! Conversations and the peer cards they are encrypted to.

use tessera_proto::{Identity, SessionId};

/// Public identity material of a peer, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Card {
    /// Account the card belongs to
    pub identity: Identity,
    /// Key material understood by the session provider
    pub public_key: Vec<u8>,
}

impl Card {
    /// Card for `identity` with the given public key.
    pub fn new(identity: Identity, public_key: Vec<u8>) -> Self {
        Self { identity, public_key }
    }
}

/// Whether a channel talks to one peer or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// One peer; named after that peer's identity
    Single,
    /// Several peers sharing one group session
    Group,
}

/// A conversation as recorded by the store.
///
/// `members` and `cards` never include the local identity and are kept in the
/// same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel identity
    pub name: Identity,
    /// Single or group
    pub kind: ChannelKind,
    /// Current group session; always `None` for single channels
    pub session_id: Option<SessionId>,
    /// Peer identities
    pub members: Vec<Identity>,
    /// Peer cards, parallel to `members`
    pub cards: Vec<Card>,
    /// Incoming messages not yet seen
    pub unread_count: u32,
}

impl Channel {
    /// Single channel with `card`'s owner.
    pub fn single(card: Card) -> Self {
        Self {
            name: card.identity.clone(),
            kind: ChannelKind::Single,
            session_id: None,
            members: vec![card.identity.clone()],
            cards: vec![card],
            unread_count: 0,
        }
    }

    /// Group channel over `cards`, not yet bootstrapped.
    pub fn group(name: Identity, cards: Vec<Card>) -> Self {
        Self {
            name,
            kind: ChannelKind::Group,
            session_id: None,
            members: cards.iter().map(|c| c.identity.clone()).collect(),
            cards,
            unread_count: 0,
        }
    }

    /// Whether this is a group channel.
    pub fn is_group(&self) -> bool {
        self.kind == ChannelKind::Group
    }

    /// Card of a member.
    pub fn card(&self, identity: &Identity) -> Option<&Card> {
        self.cards.iter().find(|c| &c.identity == identity)
    }

    /// Replace the member set, keeping `members` and `cards` aligned.
    pub fn set_cards(&mut self, cards: Vec<Card>) {
        self.members = cards.iter().map(|c| c.identity.clone()).collect();
        self.cards = cards;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(name: &str) -> Card {
        Card::new(name.into(), vec![0; 32])
    }

    #[test]
    fn single_channel_is_named_after_peer() {
        let channel = Channel::single(card("alice"));
        assert_eq!(channel.name, Identity::from("alice"));
        assert_eq!(channel.members, vec![Identity::from("alice")]);
        assert!(!channel.is_group());
    }

    #[test]
    fn set_cards_keeps_members_aligned() {
        let mut channel = Channel::group("team".into(), vec![card("bob")]);
        channel.set_cards(vec![card("carol"), card("dave")]);

        assert_eq!(channel.members, vec![Identity::from("carol"), Identity::from("dave")]);
        assert!(channel.card(&"dave".into()).is_some());
        assert!(channel.card(&"bob".into()).is_none());
    }
}
