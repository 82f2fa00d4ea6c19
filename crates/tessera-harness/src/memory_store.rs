//! In-memory [`Store`].

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tessera_core::{
    Card, Channel, LocalMessageId, MessageState, NewMessage, ServiceRecordId, StateUpdate, Store,
    StoreError, StoredMessage, StoredServiceMessage,
};
use tessera_proto::{Identity, MessageId, ServiceMessage, SessionId};

/// Store kept in ordered maps behind one mutex.
///
/// Every trait method takes the lock once, so each call is atomic. Clones
/// share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    channels: BTreeMap<Identity, Channel>,
    messages: BTreeMap<LocalMessageId, StoredMessage>,
    service: BTreeMap<ServiceRecordId, StoredServiceMessage>,
    next_message: LocalMessageId,
    next_service: ServiceRecordId,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every channel, ordered by name.
    pub fn channels(&self) -> Vec<Channel> {
        self.lock().channels.values().cloned().collect()
    }

    /// Every message, oldest first.
    pub fn all_messages(&self) -> Vec<StoredMessage> {
        self.lock().messages.values().cloned().collect()
    }

    /// Number of saved service messages.
    pub fn service_message_count(&self) -> usize {
        self.lock().service.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryStoreInner {
    fn channel_mut(&mut self, name: &Identity) -> Result<&mut Channel, StoreError> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound { what: format!("channel {name}") })
    }

    fn message_mut(&mut self, id: LocalMessageId) -> Result<&mut StoredMessage, StoreError> {
        self.messages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { what: format!("message {id}") })
    }
}

impl Store for MemoryStore {
    fn get_channel(&self, name: &Identity) -> Result<Option<Channel>, StoreError> {
        Ok(self.lock().channels.get(name).cloned())
    }

    fn get_channel_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Channel>, StoreError> {
        Ok(self
            .lock()
            .channels
            .values()
            .find(|c| c.session_id.as_ref() == Some(session_id))
            .cloned())
    }

    fn create_channel(&self, channel: Channel) -> Result<Channel, StoreError> {
        let mut inner = self.lock();
        Ok(inner.channels.entry(channel.name.clone()).or_insert(channel).clone())
    }

    fn set_session_id(
        &self,
        channel: &Identity,
        session_id: Option<SessionId>,
    ) -> Result<(), StoreError> {
        self.lock().channel_mut(channel)?.session_id = session_id;
        Ok(())
    }

    fn set_members(&self, channel: &Identity, cards: Vec<Card>) -> Result<(), StoreError> {
        self.lock().channel_mut(channel)?.set_cards(cards);
        Ok(())
    }

    fn reset_unread(&self, channel: &Identity) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.channel_mut(channel)?.unread_count = 0;
        for message in inner.messages.values_mut().filter(|m| m.channel == *channel) {
            message.unread = false;
        }
        Ok(())
    }

    fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let mut inner = self.lock();
        let channel = inner.channel_mut(&message.channel)?;
        if message.unread {
            channel.unread_count += 1;
        }

        inner.next_message += 1;
        let stored = StoredMessage {
            id: inner.next_message,
            channel: message.channel,
            author: message.author,
            body: message.body,
            incoming: message.incoming,
            state: message.state,
            unread: message.unread,
            date: message.date,
            transport_id: message.transport_id,
        };
        inner.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn get_message(&self, id: LocalMessageId) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.lock().messages.get(&id).cloned())
    }

    fn messages(&self, channel: &Identity) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.lock().messages.values().filter(|m| m.channel == *channel).cloned().collect())
    }

    fn find_message_by_transport_id(
        &self,
        transport_id: &MessageId,
    ) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self
            .lock()
            .messages
            .values()
            .find(|m| m.transport_id.as_ref() == Some(transport_id))
            .cloned())
    }

    fn attach_transport_id(
        &self,
        id: LocalMessageId,
        transport_id: MessageId,
    ) -> Result<(), StoreError> {
        self.lock().message_mut(id)?.transport_id = Some(transport_id);
        Ok(())
    }

    fn update_message_state(
        &self,
        id: LocalMessageId,
        state: MessageState,
    ) -> Result<StateUpdate, StoreError> {
        let mut inner = self.lock();
        let message = inner.message_mut(id)?;
        let previous = message.state;
        if !previous.can_transition_to(state) {
            return Ok(StateUpdate::Ignored { message: message.clone() });
        }
        message.state = state;
        Ok(StateUpdate::Applied { previous, message: message.clone() })
    }

    fn save_service_message(
        &self,
        from: &Identity,
        message: ServiceMessage,
    ) -> Result<StoredServiceMessage, StoreError> {
        let mut inner = self.lock();
        inner.next_service += 1;
        let record = StoredServiceMessage { id: inner.next_service, from: from.clone(), message };
        inner.service.insert(record.id, record.clone());
        Ok(record)
    }

    fn find_service_message(
        &self,
        from: &Identity,
        session_id: &SessionId,
        identifier: Option<&str>,
    ) -> Result<Option<StoredServiceMessage>, StoreError> {
        Ok(self
            .lock()
            .service
            .values()
            .find(|r| {
                r.from == *from
                    && r.message.session_id == *session_id
                    && r.message.identifier.as_deref() == identifier
            })
            .cloned())
    }

    fn service_messages(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<StoredServiceMessage>, StoreError> {
        Ok(self
            .lock()
            .service
            .values()
            .filter(|r| r.message.session_id == *session_id)
            .cloned()
            .collect())
    }

    fn delete_service_message(&self, id: ServiceRecordId) -> Result<(), StoreError> {
        self.lock()
            .service
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound { what: format!("service message {id}") })
    }
}
