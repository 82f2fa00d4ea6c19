//! Session registry.
//!
//! Maps channels to live provider sessions and bootstraps sessions on demand.
//! The registry is the only component that creates, replaces or forgets
//! session handles.
//!
//! # Locking
//!
//! Bootstrap, rotation and membership changes for one channel run under that
//! channel's async lock, so two of them can never assign divergent session
//! ids. Pairwise session negotiation has its own per-peer lock. A group lock
//! may be held while taking pairwise locks (fan-out), never the reverse.
//! Nothing locks across channels.
//!
//! # Invariants
//!
//! - At most one handle per [`SessionKey`]; starting a session for an
//!   existing key replaces it.
//! - Resolving twice without an intervening rotation returns the same handle.
//! - A group channel's session id is only written after the bootstrap ticket
//!   reached every member.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tessera_proto::{Envelope, Identity, ServiceKind, ServiceMessage, SessionId};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::{
    channel::{Card, Channel, ChannelKind},
    directory::CardDirectory,
    env::Environment,
    error::SessionError,
    provider::{GroupTicket, SessionHandle, SessionKey, SessionProvider},
    store::{Store, StoredServiceMessage},
    transport::{MessageKind, Transport},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum LockKey {
    Pairwise(Identity),
    Channel(Identity),
}

/// Collaborators the registry works through.
#[derive(Clone)]
pub struct Collaborators {
    /// Cryptographic sessions
    pub provider: Arc<dyn SessionProvider>,
    /// Persistence
    pub store: Arc<dyn Store>,
    /// Delivery of service messages
    pub transport: Arc<dyn Transport>,
    /// Card lookup for unknown members
    pub directory: Arc<dyn CardDirectory>,
}

/// Owner of every session handle in the process.
pub struct SessionRegistry<E: Environment> {
    pub(crate) env: E,
    pub(crate) identity: Identity,
    pub(crate) provider: Arc<dyn SessionProvider>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) directory: Arc<dyn CardDirectory>,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl<E: Environment> SessionRegistry<E> {
    /// Empty registry acting as `identity`.
    pub fn new(env: E, identity: Identity, collaborators: Collaborators) -> Self {
        Self {
            env,
            identity,
            provider: collaborators.provider,
            store: collaborators.store,
            transport: collaborators.transport,
            directory: collaborators.directory,
            sessions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Number of handles currently tracked.
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Number of per-peer and per-channel locks currently tracked.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Session to encrypt outgoing messages for `channel` with.
    ///
    /// Single channels negotiate a pairwise session with the peer. Group
    /// channels without a live session are bootstrapped: a new group session
    /// is created, its ticket is sent to every member, and only then is the
    /// session id recorded on the channel. If any member cannot be reached no
    /// session id is assigned and the call can simply be retried.
    pub async fn resolve_sender_session(
        &self,
        channel: &Channel,
    ) -> Result<SessionHandle, SessionError> {
        match channel.kind {
            ChannelKind::Single => {
                let card = match channel.cards.first() {
                    Some(card) => card.clone(),
                    None => self.directory.find_card(&channel.name).await?,
                };
                self.pairwise_sender(&card).await
            },
            ChannelKind::Group => self.group_sender(&channel.name).await,
        }
    }

    /// Pairwise session to decrypt a message `card` sent.
    pub async fn resolve_pairwise_receiver(
        &self,
        card: &Card,
        ciphertext: &[u8],
    ) -> Result<SessionHandle, SessionError> {
        let key = SessionKey::Pairwise(card.identity.clone());
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let lock = self.lock(LockKey::Pairwise(card.identity.clone()));
        let _guard = lock.lock().await;
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let handle = self.provider.start_session_as_receiver(card, ciphertext)?;
        debug!(peer = %card.identity, "pairwise session accepted");
        self.remember(handle.clone());
        Ok(handle)
    }

    /// Group session `session_id` that `sender` encrypted a message under.
    ///
    /// Unknown sessions are materialized from a service message `sender`
    /// sent for that session, preferring their bootstrap ticket over a
    /// change ticket. Later stored participant changes are replayed on top.
    ///
    /// # Errors
    ///
    /// - `SessionError::MissingServiceMessage` when no ticket for the session
    ///   has been received from `sender`, even if other members' tickets are
    ///   stored. Nothing is persisted. Not retried here.
    pub async fn resolve_receiver_session(
        &self,
        channel: &Channel,
        session_id: SessionId,
        sender: &Identity,
    ) -> Result<SessionHandle, SessionError> {
        let key = SessionKey::Group(session_id);
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let lock = self.lock(LockKey::Channel(channel.name.clone()));
        let _guard = lock.lock().await;
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let records: Vec<StoredServiceMessage> = self
            .store
            .service_messages(&session_id)?
            .into_iter()
            .filter(|r| r.message.group == channel.name)
            .collect();
        let Some(origin) = pick_origin(&records, sender) else {
            return Err(SessionError::MissingServiceMessage { sender: sender.clone(), session_id });
        };

        let ticket = GroupTicket { session_id, bytes: origin.message.ticket.clone() };
        let mut handle = self.provider.join_group_session(&ticket, &channel.cards)?;
        let mut latest = origin;
        let mut consumed = vec![origin.id];

        for record in records.iter().filter(|r| r.id > origin.id) {
            if !matches!(record.message.kind, ServiceKind::ChangeMembers { .. }) {
                continue;
            }
            match self.provider.apply_change_participants_ticket(
                &handle,
                &record.message.ticket,
                &channel.cards,
            ) {
                Ok(next) => {
                    handle = next;
                    latest = record;
                    consumed.push(record.id);
                },
                Err(e) => debug!(error = %e, from = %record.from, "skipping stored change ticket"),
            }
        }

        let cards = self.cards_for(Some(channel), &latest.message.members).await?;
        self.store.set_members(&channel.name, cards)?;
        if channel.session_id != Some(session_id) {
            self.store.set_session_id(&channel.name, Some(session_id))?;
        }
        for id in consumed {
            self.store.delete_service_message(id)?;
        }

        info!(channel = %channel.name, %session_id, from = %latest.from, "joined group session");
        self.remember(handle.clone());
        Ok(handle)
    }

    pub(crate) async fn pairwise_sender(&self, card: &Card) -> Result<SessionHandle, SessionError> {
        let key = SessionKey::Pairwise(card.identity.clone());
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let lock = self.lock(LockKey::Pairwise(card.identity.clone()));
        let _guard = lock.lock().await;
        if let Some(handle) = self.cached(&key) {
            return Ok(handle);
        }

        let handle = self.provider.start_session_as_sender(card)?;
        debug!(peer = %card.identity, "pairwise session started");
        self.remember(handle.clone());
        Ok(handle)
    }

    async fn group_sender(&self, name: &Identity) -> Result<SessionHandle, SessionError> {
        if let Some(handle) = self.current_group_session(&self.load_channel(name)?) {
            return Ok(handle);
        }

        let lock = self.lock(LockKey::Channel(name.clone()));
        let _guard = lock.lock().await;

        // A concurrent bootstrap may have finished while we waited.
        let channel = self.load_channel(name)?;
        if let Some(handle) = self.current_group_session(&channel) {
            return Ok(handle);
        }
        if let Some(stale) = channel.session_id {
            warn!(channel = %name, session_id = %stale, "group session lost, bootstrapping anew");
        }
        self.bootstrap(&channel).await
    }

    /// Create, distribute and assign a new group session. Caller holds the
    /// channel lock.
    pub(crate) async fn bootstrap(&self, channel: &Channel) -> Result<SessionHandle, SessionError> {
        let ticket = self.provider.start_group_session(&channel.cards)?;

        let mut members = channel.members.clone();
        members.push(self.identity.clone());
        members.sort();
        let message = ServiceMessage::new_session(
            channel.name.clone(),
            ticket.session_id,
            members,
            ticket.bytes.clone(),
        );

        // Nothing is assigned yet; a failed fan-out leaves the channel as it was.
        self.fan_out(&message, &channel.cards).await?;

        let handle = self.provider.join_group_session(&ticket, &channel.cards)?;
        if let Err(e) = self.store.set_session_id(&channel.name, Some(ticket.session_id)) {
            if let Err(cleanup) = self.provider.delete_session(&handle.key) {
                warn!(error = %cleanup, "failed to discard unassigned group session");
            }
            return Err(e.into());
        }

        info!(
            channel = %channel.name,
            session_id = %ticket.session_id,
            members = channel.cards.len(),
            "group session bootstrapped"
        );
        self.remember(handle.clone());
        Ok(handle)
    }

    /// Send `message` to each of `cards` over their pairwise sessions.
    pub(crate) async fn fan_out(
        &self,
        message: &ServiceMessage,
        cards: &[Card],
    ) -> Result<(), SessionError> {
        let payload = message.to_bytes();
        for card in cards {
            let session = self.pairwise_sender(card).await?;
            let ciphertext = self.provider.encrypt(&session, &payload)?;
            let envelope = Envelope::new(ciphertext, self.env.now_millis());

            self.transport
                .send(envelope.to_bytes(), &card.identity, MessageKind::Service)
                .await
                .map_err(|source| SessionError::FanOut { member: card.identity.clone(), source })?;
            debug!(to = %card.identity, session_id = %message.session_id, "service message sent");
        }
        Ok(())
    }

    /// Cards for `members` (local identity skipped), taken from `channel`
    /// where known and from the directory otherwise.
    pub(crate) async fn cards_for(
        &self,
        channel: Option<&Channel>,
        members: &[Identity],
    ) -> Result<Vec<Card>, SessionError> {
        let mut cards = Vec::with_capacity(members.len());
        for member in members.iter().filter(|m| **m != self.identity) {
            match channel.and_then(|c| c.card(member)) {
                Some(card) => cards.push(card.clone()),
                None => cards.push(self.directory.find_card(member).await?),
            }
        }
        Ok(cards)
    }

    pub(crate) fn current_group_session(&self, channel: &Channel) -> Option<SessionHandle> {
        channel.session_id.and_then(|id| self.cached(&SessionKey::Group(id)))
    }

    pub(crate) fn load_channel(&self, name: &Identity) -> Result<Channel, SessionError> {
        self.store
            .get_channel(name)?
            .ok_or_else(|| SessionError::UnknownChannel { channel: name.clone() })
    }

    pub(crate) fn cached(&self, key: &SessionKey) -> Option<SessionHandle> {
        if let Some(handle) = self.sessions().get(key) {
            return Some(handle.clone());
        }
        let handle = self.provider.existing_session(key)?;
        self.sessions().insert(key.clone(), handle.clone());
        Some(handle)
    }

    pub(crate) fn remember(&self, handle: SessionHandle) {
        self.sessions().insert(handle.key.clone(), handle);
    }

    pub(crate) fn forget(&self, key: &SessionKey) {
        self.sessions().remove(key);
    }

    /// Async lock for `key`. Entries nobody holds or waits on are pruned, so
    /// the map holds keys with an operation in flight and at most one idle
    /// entry.
    pub(crate) fn lock(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key).or_default())
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn pick_origin<'a>(
    records: &'a [StoredServiceMessage],
    sender: &Identity,
) -> Option<&'a StoredServiceMessage> {
    let mut own = records.iter().filter(|r| &r.from == sender);
    let latest = own.clone().next_back();
    own.find(|r| r.message.kind == ServiceKind::NewSession).or(latest)
}
