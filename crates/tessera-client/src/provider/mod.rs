//! Ratchet-based reference implementation of the session provider contract.
//!
//! # Pairwise sessions
//!
//! Both ends compute the X25519 shared secret of their static keys and derive
//! a session root bound to the two identities. Each side sends on its own
//! chain, so the two directions never share message keys. Either side can
//! start the session; both derive the same state.
//!
//! # Group sessions
//!
//! The creator draws a random epoch secret and distributes it in a ticket
//! (over pairwise sessions, as a service message). Every member sends on a
//! chain derived from the secret and its position in the sorted member list.
//! A participant change draws a fresh secret for the next epoch, so removed
//! members cannot read anything sent after the change. A few past epochs are
//! retained to open messages that were in flight during a change.
//!
//! The session id is bound into every box as associated data.

mod epoch;
mod wire;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tessera_core::{
    Card, Environment, GroupTicket, ProviderError, SessionHandle, SessionKey, SessionProvider,
};
use tessera_crypto::{CryptoError, NONCE_RANDOM_SIZE, derive_session_id, derive_session_root};
use tessera_proto::{Identity, SessionId};
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

use self::{
    epoch::EpochKeys,
    wire::{SealedMessage, TicketBody},
};

/// Past group epochs kept for late messages, current one included.
pub const RETAINED_EPOCHS: usize = 4;

struct PairwiseSession {
    session_id: SessionId,
    keys: EpochKeys,
}

struct GroupSession {
    epoch: u64,
    members: Vec<Identity>,
    epochs: BTreeMap<u64, EpochKeys>,
}

#[derive(Default)]
struct Sessions {
    pairwise: HashMap<Identity, PairwiseSession>,
    groups: HashMap<SessionId, GroupSession>,
}

/// Session provider built on X25519 and symmetric sender ratchets.
pub struct RatchetProvider<E: Environment> {
    env: E,
    identity: Identity,
    secret: StaticSecret,
    public: PublicKey,
    sessions: Mutex<Sessions>,
}

impl<E: Environment> RatchetProvider<E> {
    /// Provider for `identity` with a given static secret.
    pub fn new(env: E, identity: Identity, secret: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { env, identity, secret, public, sessions: Mutex::new(Sessions::default()) }
    }

    /// Provider with a freshly generated static secret.
    pub fn generate(env: E, identity: Identity) -> Self {
        let mut secret = [0u8; 32];
        env.random_bytes(&mut secret);
        Self::new(env, identity, secret)
    }

    /// Card to publish for this identity.
    pub fn card(&self) -> Card {
        Card::new(self.identity.clone(), self.public.as_bytes().to_vec())
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn nonce_suffix(&self) -> [u8; NONCE_RANDOM_SIZE] {
        let mut random = [0u8; NONCE_RANDOM_SIZE];
        self.env.random_bytes(&mut random);
        random
    }

    fn derive_pairwise(&self, card: &Card) -> Result<PairwiseSession, ProviderError> {
        let invalid = || ProviderError::InvalidCard { identity: card.identity.clone() };
        if card.identity == self.identity {
            return Err(invalid());
        }
        let key: [u8; 32] = card.public_key.as_slice().try_into().map_err(|_| invalid())?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(key));
        if !shared.was_contributory() {
            return Err(invalid());
        }

        let (first, second) = if self.identity < card.identity {
            (&self.identity, &card.identity)
        } else {
            (&card.identity, &self.identity)
        };
        let mut transcript = Vec::with_capacity(first.as_str().len() + second.as_str().len() + 1);
        transcript.extend_from_slice(first.as_str().as_bytes());
        transcript.push(0);
        transcript.extend_from_slice(second.as_str().as_bytes());

        let root = derive_session_root(shared.as_bytes(), &transcript);
        let own_index = u32::from(self.identity != *first);
        Ok(PairwiseSession {
            session_id: SessionId(derive_session_id(&root, 0)),
            keys: EpochKeys::derive(&root, 0, own_index, 2),
        })
    }

    fn epoch_keys(&self, body: &TicketBody) -> Result<EpochKeys, ProviderError> {
        let own_index = body
            .index_of(&self.identity)
            .ok_or(ProviderError::NotAMember { session_id: body.session_id })?;
        Ok(EpochKeys::derive(&body.secret, body.epoch, own_index, body.members.len() as u32))
    }

    fn fresh_secret(&self) -> [u8; 32] {
        let mut secret = [0u8; 32];
        self.env.random_bytes(&mut secret);
        secret
    }

    fn pairwise_handle(peer: &Identity, session: &PairwiseSession) -> SessionHandle {
        SessionHandle { key: SessionKey::Pairwise(peer.clone()), session_id: session.session_id }
    }

    fn group_handle(session_id: SessionId) -> SessionHandle {
        SessionHandle { key: SessionKey::Group(session_id), session_id }
    }
}

fn open_failed(e: CryptoError) -> ProviderError {
    ProviderError::DecryptionFailed { reason: e.to_string() }
}

impl<E: Environment> SessionProvider for RatchetProvider<E> {
    fn existing_session(&self, key: &SessionKey) -> Option<SessionHandle> {
        let sessions = self.sessions();
        match key {
            SessionKey::Pairwise(peer) => {
                sessions.pairwise.get(peer).map(|s| Self::pairwise_handle(peer, s))
            },
            SessionKey::Group(id) => sessions.groups.get(id).map(|_| Self::group_handle(*id)),
        }
    }

    fn start_session_as_sender(&self, card: &Card) -> Result<SessionHandle, ProviderError> {
        let session = self.derive_pairwise(card)?;
        let handle = Self::pairwise_handle(&card.identity, &session);
        self.sessions().pairwise.insert(card.identity.clone(), session);
        debug!(peer = %card.identity, session_id = %handle.session_id, "pairwise session derived");
        Ok(handle)
    }

    fn start_session_as_receiver(
        &self,
        card: &Card,
        ciphertext: &[u8],
    ) -> Result<SessionHandle, ProviderError> {
        let session = self.derive_pairwise(card)?;
        let sealed = SealedMessage::from_bytes(ciphertext)?;
        if sealed.session_id != session.session_id {
            return Err(ProviderError::DecryptionFailed {
                reason: format!("ciphertext is not from a session with {}", card.identity),
            });
        }

        let handle = Self::pairwise_handle(&card.identity, &session);
        self.sessions().pairwise.insert(card.identity.clone(), session);
        Ok(handle)
    }

    fn start_group_session(&self, members: &[Card]) -> Result<GroupTicket, ProviderError> {
        let secret = self.fresh_secret();
        let session_id = SessionId(derive_session_id(&secret, 0));
        let members: BTreeSet<Identity> = members
            .iter()
            .map(|c| c.identity.clone())
            .chain(std::iter::once(self.identity.clone()))
            .collect();

        let body = TicketBody { session_id, epoch: 0, secret, members: members.into_iter().collect() };
        Ok(GroupTicket { session_id, bytes: body.to_bytes() })
    }

    fn join_group_session(
        &self,
        ticket: &GroupTicket,
        _members: &[Card],
    ) -> Result<SessionHandle, ProviderError> {
        let body = TicketBody::from_bytes(&ticket.bytes)?;
        if body.session_id != ticket.session_id {
            return Err(ProviderError::InvalidTicket {
                reason: format!("ticket is for session {}", body.session_id),
            });
        }

        let keys = self.epoch_keys(&body)?;
        let session = GroupSession {
            epoch: body.epoch,
            members: body.members,
            epochs: BTreeMap::from([(body.epoch, keys)]),
        };
        self.sessions().groups.insert(body.session_id, session);
        Ok(Self::group_handle(body.session_id))
    }

    fn create_change_participants_ticket(
        &self,
        session: &SessionHandle,
        add: &[Card],
        remove: &[Identity],
    ) -> Result<GroupTicket, ProviderError> {
        let (epoch, current) = {
            let sessions = self.sessions();
            let group =
                sessions.groups.get(&session.session_id).ok_or(ProviderError::UnknownSession)?;
            (group.epoch, group.members.clone())
        };

        let members: BTreeSet<Identity> = current
            .into_iter()
            .filter(|m| !remove.contains(m))
            .chain(add.iter().map(|c| c.identity.clone()))
            .chain(std::iter::once(self.identity.clone()))
            .collect();
        let body = TicketBody {
            session_id: session.session_id,
            epoch: epoch + 1,
            secret: self.fresh_secret(),
            members: members.into_iter().collect(),
        };
        Ok(GroupTicket { session_id: session.session_id, bytes: body.to_bytes() })
    }

    fn apply_change_participants_ticket(
        &self,
        session: &SessionHandle,
        ticket: &[u8],
        _members: &[Card],
    ) -> Result<SessionHandle, ProviderError> {
        let body = TicketBody::from_bytes(ticket)?;
        if body.session_id != session.session_id {
            return Err(ProviderError::InvalidTicket {
                reason: format!("ticket is for session {}", body.session_id),
            });
        }
        let keys = self.epoch_keys(&body)?;

        let mut sessions = self.sessions();
        let group =
            sessions.groups.get_mut(&session.session_id).ok_or(ProviderError::UnknownSession)?;
        if body.epoch <= group.epoch {
            return Err(ProviderError::InvalidTicket {
                reason: format!("epoch {} is not after {}", body.epoch, group.epoch),
            });
        }

        group.epoch = body.epoch;
        group.members = body.members;
        group.epochs.insert(body.epoch, keys);
        while group.epochs.len() > RETAINED_EPOCHS {
            group.epochs.pop_first();
        }
        Ok(Self::group_handle(session.session_id))
    }

    fn delete_session(&self, key: &SessionKey) -> Result<(), ProviderError> {
        let mut sessions = self.sessions();
        match key {
            SessionKey::Pairwise(peer) => {
                sessions.pairwise.remove(peer);
            },
            SessionKey::Group(id) => {
                sessions.groups.remove(id);
            },
        }
        Ok(())
    }

    fn session_id_of(&self, ciphertext: &[u8]) -> Result<SessionId, ProviderError> {
        Ok(SealedMessage::from_bytes(ciphertext)?.session_id)
    }

    fn encrypt(&self, session: &SessionHandle, plaintext: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let random = self.nonce_suffix();
        let aad = session.session_id.0;
        let mut sessions = self.sessions();

        let keys = match &session.key {
            SessionKey::Pairwise(peer) => sessions
                .pairwise
                .get_mut(peer)
                .filter(|s| s.session_id == session.session_id)
                .map(|s| &mut s.keys),
            SessionKey::Group(id) => {
                sessions.groups.get_mut(id).and_then(|g| g.epochs.get_mut(&g.epoch))
            },
        }
        .ok_or(ProviderError::UnknownSession)?;

        let sealed = keys
            .seal(plaintext, &aad, random)
            .map_err(|e| ProviderError::Crypto(e.to_string()))?;
        Ok(SealedMessage::new(session.session_id, sealed).to_bytes())
    }

    fn decrypt(
        &self,
        session: &SessionHandle,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let message = SealedMessage::from_bytes(ciphertext)?;
        if message.session_id != session.session_id {
            return Err(ProviderError::DecryptionFailed {
                reason: format!("ciphertext belongs to session {}", message.session_id),
            });
        }

        let mut sessions = self.sessions();
        let keys = match &session.key {
            SessionKey::Pairwise(peer) => sessions
                .pairwise
                .get_mut(peer)
                .filter(|s| s.session_id == session.session_id)
                .map(|s| &mut s.keys)
                .ok_or(ProviderError::UnknownSession)?,
            SessionKey::Group(id) => {
                let group = sessions.groups.get_mut(id).ok_or(ProviderError::UnknownSession)?;
                group.epochs.get_mut(&message.epoch).ok_or_else(|| {
                    ProviderError::DecryptionFailed {
                        reason: format!("epoch {} is not retained", message.epoch),
                    }
                })?
            },
        };

        keys.open(&message.sealed_box(), &session.session_id.0).map_err(open_failed)
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::env::test_utils::MockEnv;

    use super::*;

    fn provider(name: &str, seed: u64) -> RatchetProvider<MockEnv> {
        RatchetProvider::generate(MockEnv::with_seed(seed), name.into())
    }

    #[test]
    fn pairwise_sessions_agree_from_either_side() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);

        let to_bob = alice.start_session_as_sender(&bob.card()).unwrap();
        let ciphertext = alice.encrypt(&to_bob, b"hello bob").unwrap();

        let from_alice = bob.start_session_as_receiver(&alice.card(), &ciphertext).unwrap();
        assert_eq!(from_alice.session_id, to_bob.session_id);
        assert_eq!(bob.decrypt(&from_alice, &ciphertext).unwrap(), b"hello bob");

        let reply = bob.encrypt(&from_alice, b"hi alice").unwrap();
        assert_eq!(alice.decrypt(&to_bob, &reply).unwrap(), b"hi alice");
    }

    #[test]
    fn pairwise_with_self_is_rejected() {
        let alice = provider("alice", 1);
        assert_eq!(
            alice.start_session_as_sender(&alice.card()),
            Err(ProviderError::InvalidCard { identity: "alice".into() })
        );
    }

    /// INVARIANT: messages reordered in transit all decrypt.
    #[test]
    fn out_of_order_messages_decrypt() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let to_bob = alice.start_session_as_sender(&bob.card()).unwrap();
        let first = alice.encrypt(&to_bob, b"first").unwrap();
        let second = alice.encrypt(&to_bob, b"second").unwrap();

        let from_alice = bob.start_session_as_receiver(&alice.card(), &second).unwrap();
        assert_eq!(bob.decrypt(&from_alice, &second).unwrap(), b"second");
        assert_eq!(bob.decrypt(&from_alice, &first).unwrap(), b"first");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let to_bob = alice.start_session_as_sender(&bob.card()).unwrap();
        let from_alice = bob.start_session_as_sender(&alice.card()).unwrap();

        let mut message =
            SealedMessage::from_bytes(&alice.encrypt(&to_bob, b"secret").unwrap()).unwrap();
        message.ciphertext[0] ^= 0x80;

        assert!(matches!(
            bob.decrypt(&from_alice, &message.to_bytes()),
            Err(ProviderError::DecryptionFailed { .. })
        ));

        message.ciphertext[0] ^= 0x80;
        assert_eq!(bob.decrypt(&from_alice, &message.to_bytes()).unwrap(), b"secret");
    }

    #[test]
    fn group_members_exchange_messages() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let carol = provider("carol", 3);

        let ticket = alice.start_group_session(&[bob.card(), carol.card()]).unwrap();
        let a = alice.join_group_session(&ticket, &[]).unwrap();
        let b = bob.join_group_session(&ticket, &[]).unwrap();
        let c = carol.join_group_session(&ticket, &[]).unwrap();

        let ciphertext = bob.encrypt(&b, b"to the group").unwrap();
        assert_eq!(alice.session_id_of(&ciphertext).unwrap(), ticket.session_id);
        assert_eq!(alice.decrypt(&a, &ciphertext).unwrap(), b"to the group");
        assert_eq!(carol.decrypt(&c, &ciphertext).unwrap(), b"to the group");
    }

    #[test]
    fn outsiders_cannot_join() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let mallory = provider("mallory", 9);

        let ticket = alice.start_group_session(&[bob.card()]).unwrap();
        assert_eq!(
            mallory.join_group_session(&ticket, &[]),
            Err(ProviderError::NotAMember { session_id: ticket.session_id })
        );
    }

    #[test]
    fn removed_member_loses_access_to_new_epoch() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let carol = provider("carol", 3);

        let ticket = alice.start_group_session(&[bob.card(), carol.card()]).unwrap();
        let a = alice.join_group_session(&ticket, &[]).unwrap();
        let b = bob.join_group_session(&ticket, &[]).unwrap();
        let c = carol.join_group_session(&ticket, &[]).unwrap();

        let change = alice.create_change_participants_ticket(&a, &[], &["carol".into()]).unwrap();
        alice.apply_change_participants_ticket(&a, &change.bytes, &[]).unwrap();
        bob.apply_change_participants_ticket(&b, &change.bytes, &[]).unwrap();
        assert_eq!(
            carol.apply_change_participants_ticket(&c, &change.bytes, &[]),
            Err(ProviderError::NotAMember { session_id: ticket.session_id })
        );

        let ciphertext = alice.encrypt(&a, b"without carol").unwrap();
        assert_eq!(bob.decrypt(&b, &ciphertext).unwrap(), b"without carol");
        assert!(carol.decrypt(&c, &ciphertext).is_err());
    }

    #[test]
    fn stale_change_ticket_is_rejected() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let ticket = alice.start_group_session(&[bob.card()]).unwrap();
        let a = alice.join_group_session(&ticket, &[]).unwrap();

        let change = alice.create_change_participants_ticket(&a, &[], &[]).unwrap();
        alice.apply_change_participants_ticket(&a, &change.bytes, &[]).unwrap();
        assert!(matches!(
            alice.apply_change_participants_ticket(&a, &change.bytes, &[]),
            Err(ProviderError::InvalidTicket { .. })
        ));
    }

    #[test]
    fn late_messages_from_previous_epoch_still_open() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let ticket = alice.start_group_session(&[bob.card()]).unwrap();
        let a = alice.join_group_session(&ticket, &[]).unwrap();
        let b = bob.join_group_session(&ticket, &[]).unwrap();

        let in_flight = bob.encrypt(&b, b"old epoch").unwrap();
        let change = alice.create_change_participants_ticket(&a, &[], &[]).unwrap();
        alice.apply_change_participants_ticket(&a, &change.bytes, &[]).unwrap();

        assert_eq!(alice.decrypt(&a, &in_flight).unwrap(), b"old epoch");
    }

    #[test]
    fn deleted_sessions_are_unknown() {
        let alice = provider("alice", 1);
        let bob = provider("bob", 2);
        let handle = alice.start_session_as_sender(&bob.card()).unwrap();

        alice.delete_session(&handle.key).unwrap();
        assert_eq!(alice.existing_session(&handle.key), None);
        assert_eq!(alice.encrypt(&handle, b"x"), Err(ProviderError::UnknownSession));
    }
}
