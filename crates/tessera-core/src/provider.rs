//! Session provider contract.
//!
//! The provider owns all key material. The core only holds
//! [`SessionHandle`]s and asks the provider to encrypt, decrypt and manage
//! session lifecycles. Calls are synchronous and expected to be fast.

use tessera_proto::{Identity, SessionId};

use crate::{channel::Card, error::ProviderError};

/// What a session is keyed by in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// Pairwise session with a peer
    Pairwise(Identity),
    /// Group session
    Group(SessionId),
}

/// Opaque reference to a live provider session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// Registry key of the session
    pub key: SessionKey,
    /// Identifier carried by ciphertext produced under this session
    pub session_id: SessionId,
}

/// Serialized group session ticket produced by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTicket {
    /// Session the ticket creates or modifies
    pub session_id: SessionId,
    /// Provider-specific encoding
    pub bytes: Vec<u8>,
}

/// Cryptographic session capability.
pub trait SessionProvider: Send + Sync {
    /// Session already known for `key`, if any.
    fn existing_session(&self, key: &SessionKey) -> Option<SessionHandle>;

    /// Open a pairwise session towards `card`. Replaces any previous one.
    fn start_session_as_sender(&self, card: &Card) -> Result<SessionHandle, ProviderError>;

    /// Open a pairwise session from the first ciphertext `card` sent us.
    fn start_session_as_receiver(
        &self,
        card: &Card,
        ciphertext: &[u8],
    ) -> Result<SessionHandle, ProviderError>;

    /// Create a new group session over `members` (local identity implied).
    ///
    /// Nothing is stored: the session exists only once the returned ticket is
    /// passed to [`join_group_session`](Self::join_group_session).
    fn start_group_session(&self, members: &[Card]) -> Result<GroupTicket, ProviderError>;

    /// Materialize a group session from a bootstrap or change ticket.
    fn join_group_session(
        &self,
        ticket: &GroupTicket,
        members: &[Card],
    ) -> Result<SessionHandle, ProviderError>;

    /// Ticket that adds and removes participants of `session`.
    fn create_change_participants_ticket(
        &self,
        session: &SessionHandle,
        add: &[Card],
        remove: &[Identity],
    ) -> Result<GroupTicket, ProviderError>;

    /// Apply a change ticket to `session`.
    fn apply_change_participants_ticket(
        &self,
        session: &SessionHandle,
        ticket: &[u8],
        members: &[Card],
    ) -> Result<SessionHandle, ProviderError>;

    /// Drop the session stored under `key`. Unknown keys are not an error.
    fn delete_session(&self, key: &SessionKey) -> Result<(), ProviderError>;

    /// Session a ciphertext was produced under, without decrypting it.
    fn session_id_of(&self, ciphertext: &[u8]) -> Result<SessionId, ProviderError>;

    /// Encrypt under `session`.
    fn encrypt(&self, session: &SessionHandle, plaintext: &[u8]) -> Result<Vec<u8>, ProviderError>;

    /// Decrypt under `session`.
    fn decrypt(&self, session: &SessionHandle, ciphertext: &[u8])
    -> Result<Vec<u8>, ProviderError>;
}
