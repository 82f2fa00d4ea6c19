//! Inbound message pipeline.
//!
//! Turns one received envelope into exactly one of: a stored message, an
//! ephemeral call signal, a stored or applied service message, or an error.
//!
//! # Ordering
//!
//! ```text
//! resolve session ─► decrypt body ─► decrypt additional data ─► decode
//!        │                 │                     │                 │
//!        │                 └──── placeholder ◄───┴─────────────────┘
//!        ▼                              │
//!   MissingServiceMessage          propagate error
//!   (nothing stored)
//!
//! decode ok ─► persist ─► notify
//! ```
//!
//! A message is always persisted before anything is told about it. Failures
//! after the channel is known leave a placeholder record behind so the user
//! sees that something arrived.

use std::sync::Arc;

use tessera_core::{
    Channel, ConnectionMonitor, Environment, MessageBody, MessageKind, MessageState, NewMessage,
    Notification, ServiceOutcome, SessionError, SessionHandle, StateUpdate, StoredMessage,
};
use tessera_proto::{Envelope, Identity, MessageContent, MessageId, ServiceMessage, decode};
use tracing::{debug, info, warn};

use crate::{
    body::{push_preview, stored_body},
    context::Context,
    error::{ContentError, ProcessError},
};

/// What a processed message turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Persisted chat message
    Stored(StoredMessage),
    /// Call answer or ICE candidate handed to the call layer
    CallSignal,
    /// Service message taken in by the registry
    Service(ServiceOutcome),
}

/// Inbound pipeline.
pub struct MessageProcessor<E: Environment> {
    ctx: Arc<Context<E>>,
}

impl<E: Environment> Clone for MessageProcessor<E> {
    fn clone(&self) -> Self {
        Self { ctx: Arc::clone(&self.ctx) }
    }
}

impl<E: Environment> MessageProcessor<E> {
    /// Processor working on `ctx`.
    pub fn new(ctx: Arc<Context<E>>) -> Self {
        Self { ctx }
    }

    /// Connection state the processor's client runs under.
    pub fn connection(&self) -> &ConnectionMonitor {
        &self.ctx.connection
    }

    /// Route a raw transport payload by its kind.
    pub async fn process_raw(
        &self,
        payload: &[u8],
        from: &Identity,
        group: Option<&Identity>,
        message_id: MessageId,
        kind: MessageKind,
    ) -> Result<Processed, ProcessError> {
        let envelope = match Envelope::from_bytes(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%from, error = %e, "unreadable envelope");
                if kind != MessageKind::Service {
                    let channel = match group {
                        Some(name) => self.ctx.store.get_channel(name)?,
                        None => Some(self.ctx.channel_for_peer(from).await?),
                    };
                    if let Some(channel) = channel {
                        let now = self.ctx.env.now_millis();
                        self.leave_placeholder(&channel, from, message_id, now)?;
                    }
                }
                return Err(ProcessError::Envelope(e));
            },
        };

        match (kind, group) {
            (MessageKind::Service, _) => {
                self.process_service(envelope, from).await.map(Processed::Service)
            },
            (MessageKind::Group, Some(group)) => {
                self.process_group(envelope, group, from, message_id).await
            },
            (MessageKind::Group, None) | (MessageKind::Chat, _) => {
                self.process(envelope, from, message_id).await
            },
        }
    }

    /// Process a message `from` sent on the single channel with them.
    pub async fn process(
        &self,
        envelope: Envelope,
        from: &Identity,
        message_id: MessageId,
    ) -> Result<Processed, ProcessError> {
        let channel = self.ctx.channel_for_peer(from).await?;
        let card = match channel.card(from) {
            Some(card) => card.clone(),
            None => self.ctx.directory.find_card(from).await.map_err(SessionError::from)?,
        };

        let session = match self
            .ctx
            .registry
            .resolve_pairwise_receiver(&card, &envelope.ciphertext)
            .await
        {
            Ok(session) => session,
            Err(SessionError::Provider(e)) => {
                warn!(%from, error = %e, "no pairwise session for message");
                self.leave_placeholder(&channel, from, message_id, envelope.date)?;
                return Err(ProcessError::Decrypt(e));
            },
            Err(e) => return Err(e.into()),
        };

        self.open(&channel, from, &session, envelope, message_id).await
    }

    /// Process a message `from` sent to group channel `group`.
    ///
    /// # Errors
    ///
    /// - `SessionError::MissingServiceMessage` when the group session's
    ///   ticket has not arrived yet. Nothing is stored; redelivery after the
    ///   ticket arrives succeeds.
    pub async fn process_group(
        &self,
        envelope: Envelope,
        group: &Identity,
        from: &Identity,
        message_id: MessageId,
    ) -> Result<Processed, ProcessError> {
        let channel = self.ctx.store.get_channel(group)?;

        let session_id = match self.ctx.provider.session_id_of(&envelope.ciphertext) {
            Ok(id) => id,
            Err(e) => {
                warn!(%group, %from, error = %e, "group message without session id");
                if let Some(channel) = &channel {
                    self.leave_placeholder(channel, from, message_id, envelope.date)?;
                }
                return Err(ProcessError::Decrypt(e));
            },
        };

        let Some(channel) = channel.filter(Channel::is_group) else {
            debug!(%group, %from, %session_id, "group message before any ticket");
            let missing = SessionError::MissingServiceMessage { sender: from.clone(), session_id };
            return Err(missing.into());
        };

        let session = self.ctx.registry.resolve_receiver_session(&channel, session_id, from).await?;
        self.open(&channel, from, &session, envelope, message_id).await
    }

    /// Decrypt and take in a service message `from` sent pairwise.
    pub async fn process_service(
        &self,
        envelope: Envelope,
        from: &Identity,
    ) -> Result<ServiceOutcome, ProcessError> {
        let card = self.ctx.directory.find_card(from).await.map_err(SessionError::from)?;
        let session = match self
            .ctx
            .registry
            .resolve_pairwise_receiver(&card, &envelope.ciphertext)
            .await
        {
            Ok(session) => session,
            Err(SessionError::Provider(e)) => return Err(ProcessError::Decrypt(e)),
            Err(e) => return Err(e.into()),
        };

        let plaintext = self
            .ctx
            .provider
            .decrypt(&session, &envelope.ciphertext)
            .map_err(ProcessError::Decrypt)?;
        let message = ServiceMessage::from_bytes(&plaintext).map_err(ProcessError::Service)?;
        let group = message.group.clone();

        let outcome = self.ctx.registry.accept_service_message(from, message).await?;
        if matches!(outcome, ServiceOutcome::Stored | ServiceOutcome::Removed) {
            self.ctx.notify(Notification::ChannelListChanged);
        }
        debug!(%from, %group, ?outcome, "service message processed");
        Ok(outcome)
    }

    /// Apply a delivery or read receipt to one of our messages.
    ///
    /// Unknown ids, incoming messages and regressing or repeated states are
    /// ignored. Returns whether the stored state changed.
    pub fn process_status_update(
        &self,
        state: MessageState,
        message_id: &MessageId,
        from: &Identity,
    ) -> Result<bool, ProcessError> {
        let Some(message) = self.ctx.store.find_message_by_transport_id(message_id)? else {
            debug!(%message_id, %from, "receipt for unknown message");
            return Ok(false);
        };
        if message.incoming {
            debug!(%message_id, %from, "receipt for incoming message ignored");
            return Ok(false);
        }

        match self.ctx.store.update_message_state(message.id, state)? {
            StateUpdate::Applied { previous, message } => {
                debug!(%message_id, %previous, %state, "message state updated");
                if self.ctx.is_active(&message.channel) {
                    self.ctx.notify(Notification::MessageStateChanged {
                        id: message.id,
                        transport_id: message.transport_id,
                        state,
                    });
                }
                Ok(true)
            },
            StateUpdate::Ignored { message } => {
                debug!(%message_id, current = %message.state, %state, "receipt ignored");
                Ok(false)
            },
        }
    }

    async fn open(
        &self,
        channel: &Channel,
        from: &Identity,
        session: &SessionHandle,
        envelope: Envelope,
        message_id: MessageId,
    ) -> Result<Processed, ProcessError> {
        let plaintext = match self.ctx.provider.decrypt(session, &envelope.ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(channel = %channel.name, %from, error = %e, "message decryption failed");
                self.leave_placeholder(channel, from, message_id, envelope.date)?;
                return Err(ProcessError::Decrypt(e));
            },
        };

        let additional = match envelope.additional_data.as_deref() {
            Some(data) => match self.ctx.provider.decrypt(session, data) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(channel = %channel.name, %from, error = %e, "additional data decryption failed");
                    self.leave_placeholder(channel, from, message_id, envelope.date)?;
                    return Err(ProcessError::AdditionalData(e));
                },
            },
            None => None,
        };

        let content = match decode(&plaintext, envelope.version) {
            Ok(content) => content,
            Err(e) => {
                warn!(channel = %channel.name, %from, version = %envelope.version, error = %e, "undecodable content");
                self.leave_placeholder(channel, from, message_id, envelope.date)?;
                return Err(ContentError::from(e).into());
            },
        };

        if content.is_ephemeral() {
            debug!(channel = %channel.name, %from, tag = content.tag(), "call signal");
            self.ctx.notify(Notification::CallSignal {
                channel: channel.name.clone(),
                from: from.clone(),
                content,
            });
            return Ok(Processed::CallSignal);
        }

        if matches!(content, MessageContent::Photo { .. }) && additional.is_none() {
            warn!(channel = %channel.name, %from, "photo without thumbnail");
            self.leave_placeholder(channel, from, message_id, envelope.date)?;
            return Err(ContentError::MissingThumbnail.into());
        }

        let Some(body) = stored_body(&content, additional) else {
            return Ok(Processed::CallSignal);
        };
        let unread = !self.ctx.is_active(&channel.name);
        let stored = self.ctx.store.create_message(NewMessage {
            channel: channel.name.clone(),
            author: from.clone(),
            body,
            incoming: true,
            state: MessageState::Received,
            unread,
            date: envelope.date,
            transport_id: Some(message_id),
        })?;
        info!(channel = %channel.name, %from, id = stored.id, tag = content.tag(), "message received");

        if unread {
            self.ctx.notify(Notification::ChannelListChanged);
            self.ctx.notify(Notification::LocalPushRequested {
                preview: push_preview(&self.ctx.config, &content),
                author: from.clone(),
            });
        } else {
            self.ctx.notify(Notification::MessageArrived(stored.clone()));
        }
        Ok(Processed::Stored(stored))
    }

    fn leave_placeholder(
        &self,
        channel: &Channel,
        from: &Identity,
        message_id: MessageId,
        date: u64,
    ) -> Result<(), ProcessError> {
        self.ctx.store.create_message(NewMessage {
            channel: channel.name.clone(),
            author: from.clone(),
            body: MessageBody::Undecryptable { placeholder: self.ctx.config.placeholder_body.clone() },
            incoming: true,
            state: MessageState::Received,
            unread: false,
            date,
            transport_id: Some(message_id),
        })?;
        Ok(())
    }
}
