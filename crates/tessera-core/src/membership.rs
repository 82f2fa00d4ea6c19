//! Group membership protocol: participant changes, rotation and intake of
//! service messages from peers.

use std::collections::BTreeSet;

use tessera_proto::{Identity, ServiceKind, ServiceMessage};
use tracing::{debug, info};

use crate::{
    channel::{Card, Channel},
    env::Environment,
    error::SessionError,
    provider::{SessionHandle, SessionKey},
    registry::{LockKey, SessionRegistry},
};

/// A participant change that has been applied locally and still has to be
/// announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    /// Service message carrying the change ticket
    pub message: ServiceMessage,
    /// Everyone who was or now is a member, local identity excluded
    pub recipients: Vec<Card>,
}

/// What [`SessionRegistry::accept_service_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Saved until a message under its session arrives
    Stored,
    /// Already saved or already applied
    Duplicate,
    /// Change applied to the live session
    Applied,
    /// Local identity was removed; the session was dropped
    Removed,
}

impl<E: Environment> SessionRegistry<E> {
    /// Add and remove participants of a bootstrapped group.
    ///
    /// The change is applied locally before returning; pass the result to
    /// [`announce_membership`](Self::announce_membership) to distribute it.
    ///
    /// # Errors
    ///
    /// - `SessionError::BootstrapInProgress` when another bootstrap, rotation
    ///   or membership change holds the channel
    /// - `SessionError::NoActiveSession` when the group was never bootstrapped
    pub async fn change_membership(
        &self,
        name: &Identity,
        add: &[Identity],
        remove: &[Identity],
    ) -> Result<MembershipChange, SessionError> {
        let lock = self.lock(LockKey::Channel(name.clone()));
        let Ok(_guard) = lock.try_lock() else {
            return Err(SessionError::BootstrapInProgress { channel: name.clone() });
        };

        let channel = self.load_channel(name)?;
        if !channel.is_group() {
            return Err(SessionError::NotAGroup { channel: name.clone() });
        }
        let no_session = || SessionError::NoActiveSession { channel: name.clone() };
        let session_id = channel.session_id.ok_or_else(no_session)?;
        let session = self.current_group_session(&channel).ok_or_else(no_session)?;

        let mut added: Vec<Card> = Vec::new();
        for identity in add {
            let known = *identity == self.identity
                || channel.card(identity).is_some()
                || added.iter().any(|c| &c.identity == identity);
            if !known {
                added.push(self.directory.find_card(identity).await?);
            }
        }
        let removed: Vec<Identity> =
            remove.iter().filter(|id| channel.card(id).is_some()).cloned().collect();

        let ticket = self.provider.create_change_participants_ticket(&session, &added, &removed)?;
        let cards: Vec<Card> = channel
            .cards
            .iter()
            .filter(|c| !removed.contains(&c.identity))
            .chain(added.iter())
            .cloned()
            .collect();
        let session =
            self.provider.apply_change_participants_ticket(&session, &ticket.bytes, &cards)?;
        self.store.set_members(name, cards.clone())?;
        self.remember(session);

        let members: BTreeSet<Identity> = cards
            .iter()
            .map(|c| c.identity.clone())
            .chain(std::iter::once(self.identity.clone()))
            .collect();
        let mut id = [0u8; 8];
        self.env.random_bytes(&mut id);

        let recipients = channel.cards.iter().chain(added.iter()).cloned().collect();
        info!(
            channel = %name,
            %session_id,
            added = added.len(),
            removed = removed.len(),
            "group membership changed"
        );

        Ok(MembershipChange {
            message: ServiceMessage::change_members(
                name.clone(),
                session_id,
                hex::encode(id),
                members.into_iter().collect(),
                added.into_iter().map(|c| c.identity).collect(),
                removed,
                ticket.bytes,
            ),
            recipients,
        })
    }

    /// Send a membership change to every old and new member.
    ///
    /// Removed members receive the change without the ticket so they learn
    /// of their removal without obtaining the new key material.
    pub async fn announce_membership(&self, change: &MembershipChange) -> Result<(), SessionError> {
        let (staying, leaving): (Vec<Card>, Vec<Card>) = change
            .recipients
            .iter()
            .cloned()
            .partition(|c| change.message.members.contains(&c.identity));

        self.fan_out(&change.message, &staying).await?;
        if !leaving.is_empty() {
            let notice = ServiceMessage { ticket: Vec::new(), ..change.message.clone() };
            self.fan_out(&notice, &leaving).await?;
        }
        Ok(())
    }

    /// Replace a group's session with a freshly bootstrapped one.
    ///
    /// Same fan-out and rollback rules as the first bootstrap; older sessions
    /// stay available for decrypting messages already in flight.
    pub async fn rotate(&self, name: &Identity) -> Result<SessionHandle, SessionError> {
        let lock = self.lock(LockKey::Channel(name.clone()));
        let Ok(_guard) = lock.try_lock() else {
            return Err(SessionError::BootstrapInProgress { channel: name.clone() });
        };

        let channel = self.load_channel(name)?;
        if !channel.is_group() {
            return Err(SessionError::NotAGroup { channel: name.clone() });
        }
        info!(channel = %name, previous = ?channel.session_id, "rotating group session");
        self.bootstrap(&channel).await
    }

    /// Take in a service message received from `from`.
    ///
    /// Unknown group channels are created from the message's member list.
    /// Bootstrap tickets are saved (once) for lazy materialization by
    /// [`resolve_receiver_session`](Self::resolve_receiver_session). Change
    /// tickets are applied straight away when the session is live and saved
    /// otherwise.
    pub async fn accept_service_message(
        &self,
        from: &Identity,
        message: ServiceMessage,
    ) -> Result<ServiceOutcome, SessionError> {
        let channel = self.ensure_group_channel(&message).await?;
        let key = SessionKey::Group(message.session_id);

        if let Some(session) = self.cached(&key) {
            return match message.kind {
                ServiceKind::NewSession => Ok(ServiceOutcome::Duplicate),
                ServiceKind::ChangeMembers { .. } => {
                    self.apply_remote_change(&channel, &session, &message).await
                },
            };
        }

        let existing = self.store.find_service_message(
            from,
            &message.session_id,
            message.identifier.as_deref(),
        )?;
        if existing.is_some() {
            debug!(%from, session_id = %message.session_id, "duplicate service message");
            return Ok(ServiceOutcome::Duplicate);
        }

        debug!(%from, group = %message.group, session_id = %message.session_id, "service message stored");
        self.store.save_service_message(from, message)?;
        Ok(ServiceOutcome::Stored)
    }

    async fn apply_remote_change(
        &self,
        channel: &Channel,
        session: &SessionHandle,
        message: &ServiceMessage,
    ) -> Result<ServiceOutcome, SessionError> {
        let lock = self.lock(LockKey::Channel(channel.name.clone()));
        let _guard = lock.lock().await;

        if !message.members.contains(&self.identity) {
            self.forget(&session.key);
            self.provider.delete_session(&session.key)?;
            if channel.session_id == Some(message.session_id) {
                self.store.set_session_id(&channel.name, None)?;
            }
            info!(channel = %channel.name, "removed from group");
            return Ok(ServiceOutcome::Removed);
        }

        let cards = self.cards_for(Some(channel), &message.members).await?;
        let session = match self.provider.apply_change_participants_ticket(
            session,
            &message.ticket,
            &cards,
        ) {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, channel = %channel.name, "change ticket not applicable");
                return Ok(ServiceOutcome::Duplicate);
            },
        };
        self.store.set_members(&channel.name, cards)?;
        self.remember(session);
        info!(channel = %channel.name, members = message.members.len(), "applied membership change");
        Ok(ServiceOutcome::Applied)
    }

    async fn ensure_group_channel(&self, message: &ServiceMessage) -> Result<Channel, SessionError> {
        if let Some(channel) = self.store.get_channel(&message.group)? {
            if !channel.is_group() {
                return Err(SessionError::NotAGroup { channel: channel.name });
            }
            return Ok(channel);
        }

        let cards = self.cards_for(None, &message.members).await?;
        let channel = self.store.create_channel(Channel::group(message.group.clone(), cards))?;
        info!(channel = %channel.name, members = channel.members.len(), "group channel created");
        Ok(channel)
    }
}
