//! Outbound message pipeline.
//!
//! ```text
//! persist pending ─► gate ─► resolve session ─► encode ─► encrypt ─► dispatch
//!                     │            │               │          │          │
//!                     └────────────┴───────────────┴──────────┴──────────┤
//!                                                                         ▼
//!                                                     settle success / failed
//! ```
//!
//! A user-authored message is persisted before anything else happens and
//! always ends settled. Call answers and ICE candidates are sent without a
//! local record.

use std::sync::Arc;

use tessera_core::{
    Channel, Environment, LocalMessageId, MessageKind, MessageState, NewMessage, Notification,
    SessionError, StateUpdate, StoreError,
};
use tessera_proto::{Envelope, EnvelopeVersion, Identity, MessageContent, MessageId, encode};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    body::stored_body,
    context::Context,
    error::{SendError, SendFailure},
    status::{OutboundStatus, Settle},
};

/// A message to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    /// Content
    pub content: MessageContent,
    /// Auxiliary bytes encrypted separately (photo thumbnail)
    pub attachment: Option<Vec<u8>>,
}

impl Outgoing {
    /// Message without auxiliary data.
    pub fn new(content: MessageContent) -> Self {
        Self { content, attachment: None }
    }

    /// Text message.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(MessageContent::text(body))
    }

    /// Attach auxiliary bytes.
    #[must_use]
    pub fn with_attachment(mut self, data: Vec<u8>) -> Self {
        self.attachment = Some(data);
        self
    }
}

/// A successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Local record; `None` for call signalling
    pub local_id: Option<LocalMessageId>,
    /// Id the transport assigned
    pub transport_id: MessageId,
}

/// Completion of a spawned send.
#[derive(Debug)]
pub struct SendHandle {
    done: oneshot::Receiver<Result<SendReceipt, SendFailure>>,
}

impl SendHandle {
    /// Wait for the send to settle.
    pub async fn wait(self) -> Result<SendReceipt, SendFailure> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(SendFailure { local_id: None, error: SendError::Aborted }),
        }
    }
}

/// Outbound pipeline.
pub struct MessageSender<E: Environment> {
    ctx: Arc<Context<E>>,
}

impl<E: Environment> Clone for MessageSender<E> {
    fn clone(&self) -> Self {
        Self { ctx: Arc::clone(&self.ctx) }
    }
}

impl<E: Environment> MessageSender<E> {
    /// Sender working on `ctx`.
    pub fn new(ctx: Arc<Context<E>>) -> Self {
        Self { ctx }
    }

    /// Send `outgoing` to `channel` and wait until it settles.
    ///
    /// Unknown channel names are treated as peers and get a single channel
    /// from the directory.
    ///
    /// # Errors
    ///
    /// Every failure after the pending record was written leaves it in the
    /// `failed` state and reports its id in [`SendFailure::local_id`].
    pub async fn send(
        &self,
        channel: &Identity,
        outgoing: Outgoing,
    ) -> Result<SendReceipt, SendFailure> {
        let channel = self
            .load_channel(channel)
            .await
            .map_err(|e| SendFailure { local_id: None, error: e.into() })?;

        let mut status = if outgoing.content.is_ephemeral() {
            None
        } else {
            let id = self
                .persist_pending(&channel, &outgoing)
                .map_err(|e| SendFailure { local_id: None, error: e.into() })?;
            Some(OutboundStatus::new(id))
        };
        let local_id = status.map(|s| s.local_id());

        match self.dispatch(&channel, &outgoing).await {
            Ok(transport_id) => {
                if let Some(status) = &mut status {
                    self.settle(status, MessageState::Success, Some(&transport_id))
                        .map_err(|e| SendFailure { local_id, error: e.into() })?;
                }
                info!(channel = %channel.name, ?local_id, %transport_id, tag = outgoing.content.tag(), "message sent");
                Ok(SendReceipt { local_id, transport_id })
            },
            Err(error) => {
                warn!(channel = %channel.name, ?local_id, %error, "send failed");
                if let Some(status) = &mut status
                    && let Err(e) = self.settle(status, MessageState::Failed, None)
                {
                    warn!(?local_id, error = %e, "could not record failed send");
                }
                Err(SendFailure { local_id, error })
            },
        }
    }

    /// Send in the background. The handle resolves exactly once, whether or
    /// not anyone waits on it.
    pub fn spawn_send(&self, channel: Identity, outgoing: Outgoing) -> SendHandle {
        let (done, rx) = oneshot::channel();
        let sender = self.clone();
        tokio::spawn(async move {
            let result = sender.send(&channel, outgoing).await;
            if done.send(result).is_err() {
                debug!(%channel, "send result dropped by caller");
            }
        });
        SendHandle { done: rx }
    }

    /// Encrypt `data` with `channel`'s session, upload it out of band and
    /// return the download URL to reference from a photo or voice message.
    pub async fn upload_media(
        &self,
        channel: &Identity,
        name: &str,
        data: Vec<u8>,
    ) -> Result<String, SendError> {
        self.ctx.connection.ensure_connected()?;
        let channel = self.load_channel(channel).await?;
        let session = self.ctx.registry.resolve_sender_session(&channel).await?;
        let encrypted = self.ctx.provider.encrypt(&session, &data).map_err(SendError::Encrypt)?;

        let slot = self.ctx.transport.request_upload_slot(name, encrypted.len()).await?;
        self.ctx.connection.ensure_connected()?;
        tokio::select! {
            biased;
            lost = self.ctx.connection.lost() => return Err(lost.into()),
            uploaded = self.ctx.transport.upload(&slot, encrypted) => uploaded?,
        }
        debug!(channel = %channel.name, name, url = %slot.get_url, "media uploaded");
        Ok(slot.get_url)
    }

    async fn load_channel(&self, name: &Identity) -> Result<Channel, SessionError> {
        match self.ctx.store.get_channel(name)? {
            Some(channel) => Ok(channel),
            None => self.ctx.channel_for_peer(name).await,
        }
    }

    fn persist_pending(
        &self,
        channel: &Channel,
        outgoing: &Outgoing,
    ) -> Result<LocalMessageId, StoreError> {
        let Some(body) = stored_body(&outgoing.content, outgoing.attachment.clone()) else {
            return Err(StoreError::Backend("ephemeral content has no stored form".to_string()));
        };
        let record = self.ctx.store.create_message(NewMessage {
            channel: channel.name.clone(),
            author: self.ctx.identity().clone(),
            body,
            incoming: false,
            state: MessageState::Pending,
            unread: false,
            date: self.ctx.env.now_millis(),
            transport_id: None,
        })?;
        Ok(record.id)
    }

    async fn dispatch(&self, channel: &Channel, outgoing: &Outgoing) -> Result<MessageId, SendError> {
        self.ctx.connection.ensure_connected()?;
        let session = self.ctx.registry.resolve_sender_session(channel).await?;

        let plaintext = encode(&outgoing.content, EnvelopeVersion::LATEST)?;
        let ciphertext =
            self.ctx.provider.encrypt(&session, &plaintext).map_err(SendError::Encrypt)?;
        let mut envelope = Envelope::new(ciphertext, self.ctx.env.now_millis());
        if let Some(data) = &outgoing.attachment {
            let data = self.ctx.provider.encrypt(&session, data).map_err(SendError::Encrypt)?;
            envelope = envelope.with_additional_data(data);
        }

        let kind = if channel.is_group() { MessageKind::Group } else { MessageKind::Chat };
        self.ctx.connection.ensure_connected()?;
        tokio::select! {
            biased;
            lost = self.ctx.connection.lost() => Err(lost.into()),
            sent = self.ctx.transport.send(envelope.to_bytes(), &channel.name, kind) => Ok(sent?),
        }
    }

    /// Persist `state` and only then advance the in-memory status. The
    /// transport id is attached afterwards; failing to record it does not
    /// keep the message pending.
    fn settle(
        &self,
        status: &mut OutboundStatus,
        state: MessageState,
        transport_id: Option<&MessageId>,
    ) -> Result<(), StoreError> {
        let mut next = *status;
        if next.settle(state) != Settle::Applied {
            return Ok(());
        }
        let id = next.local_id();
        let update = self.ctx.store.update_message_state(id, state)?;
        *status = next;

        let mut attached = None;
        if let Some(transport_id) = transport_id {
            match self.ctx.store.attach_transport_id(id, transport_id.clone()) {
                Ok(()) => attached = Some(transport_id.clone()),
                Err(e) => warn!(id, %transport_id, error = %e, "could not record transport id"),
            }
        }

        match update {
            StateUpdate::Applied { message, .. } => {
                self.ctx.notify(Notification::MessageStateChanged {
                    id,
                    transport_id: attached.or(message.transport_id),
                    state,
                });
            },
            StateUpdate::Ignored { message } => {
                debug!(id, current = %message.state, %state, "settle ignored by store");
            },
        }
        Ok(())
    }
}
