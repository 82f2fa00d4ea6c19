//! Store wrapper that injects write failures.

use std::sync::{Arc, Mutex, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tessera_core::{
    Card, Channel, LocalMessageId, MessageState, NewMessage, ServiceRecordId, StateUpdate, Store,
    StoreError, StoredMessage, StoredServiceMessage,
};
use tessera_proto::{Identity, MessageId, ServiceMessage, SessionId};

/// Delegates to `S` but fails mutating calls with probability
/// `failure_rate`. Reads always succeed so tests can inspect what made it in.
/// [`only`](Self::only) narrows the failures to named operations.
#[derive(Clone)]
pub struct ChaoticStore<S: Store> {
    inner: S,
    failure_rate: f64,
    targets: Option<Vec<&'static str>>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl<S: Store> ChaoticStore<S> {
    /// Wrapper with a fixed seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x7E55_E7A0)
    }

    /// Wrapper with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );
        Self {
            inner,
            failure_rate,
            targets: None,
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Restrict injected failures to the named `Store` methods.
    pub fn only(mut self, operations: &[&'static str]) -> Self {
        self.targets = Some(operations.to_vec());
        self
    }

    /// Wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn chaos(&self, operation: &str) -> Result<(), StoreError> {
        if let Some(targets) = &self.targets
            && !targets.contains(&operation)
        {
            return Ok(());
        }
        let roll: f64 = self.rng.lock().unwrap_or_else(PoisonError::into_inner).r#gen();
        if roll < self.failure_rate {
            return Err(StoreError::Backend(format!("injected failure in {operation}")));
        }
        Ok(())
    }
}

impl<S: Store> Store for ChaoticStore<S> {
    fn get_channel(&self, name: &Identity) -> Result<Option<Channel>, StoreError> {
        self.inner.get_channel(name)
    }

    fn get_channel_by_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<Channel>, StoreError> {
        self.inner.get_channel_by_session(session_id)
    }

    fn create_channel(&self, channel: Channel) -> Result<Channel, StoreError> {
        self.chaos("create_channel")?;
        self.inner.create_channel(channel)
    }

    fn set_session_id(
        &self,
        channel: &Identity,
        session_id: Option<SessionId>,
    ) -> Result<(), StoreError> {
        self.chaos("set_session_id")?;
        self.inner.set_session_id(channel, session_id)
    }

    fn set_members(&self, channel: &Identity, cards: Vec<Card>) -> Result<(), StoreError> {
        self.chaos("set_members")?;
        self.inner.set_members(channel, cards)
    }

    fn reset_unread(&self, channel: &Identity) -> Result<(), StoreError> {
        self.chaos("reset_unread")?;
        self.inner.reset_unread(channel)
    }

    fn create_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        self.chaos("create_message")?;
        self.inner.create_message(message)
    }

    fn get_message(&self, id: LocalMessageId) -> Result<Option<StoredMessage>, StoreError> {
        self.inner.get_message(id)
    }

    fn messages(&self, channel: &Identity) -> Result<Vec<StoredMessage>, StoreError> {
        self.inner.messages(channel)
    }

    fn find_message_by_transport_id(
        &self,
        transport_id: &MessageId,
    ) -> Result<Option<StoredMessage>, StoreError> {
        self.inner.find_message_by_transport_id(transport_id)
    }

    fn attach_transport_id(
        &self,
        id: LocalMessageId,
        transport_id: MessageId,
    ) -> Result<(), StoreError> {
        self.chaos("attach_transport_id")?;
        self.inner.attach_transport_id(id, transport_id)
    }

    fn update_message_state(
        &self,
        id: LocalMessageId,
        state: MessageState,
    ) -> Result<StateUpdate, StoreError> {
        self.chaos("update_message_state")?;
        self.inner.update_message_state(id, state)
    }

    fn save_service_message(
        &self,
        from: &Identity,
        message: ServiceMessage,
    ) -> Result<StoredServiceMessage, StoreError> {
        self.chaos("save_service_message")?;
        self.inner.save_service_message(from, message)
    }

    fn find_service_message(
        &self,
        from: &Identity,
        session_id: &SessionId,
        identifier: Option<&str>,
    ) -> Result<Option<StoredServiceMessage>, StoreError> {
        self.inner.find_service_message(from, session_id, identifier)
    }

    fn service_messages(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<StoredServiceMessage>, StoreError> {
        self.inner.service_messages(session_id)
    }

    fn delete_service_message(&self, id: ServiceRecordId) -> Result<(), StoreError> {
        self.chaos("delete_service_message")?;
        self.inner.delete_service_message(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn channel() -> Channel {
        Channel::single(Card::new(Identity::new("bob"), vec![1]))
    }

    #[test]
    fn zero_rate_never_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);
        for _ in 0..100 {
            store.create_channel(channel()).unwrap();
        }
    }

    #[test]
    fn full_rate_fails_writes_but_not_reads() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0);
        assert!(matches!(store.create_channel(channel()), Err(StoreError::Backend(_))));
        assert_eq!(store.get_channel(&Identity::new("bob")).unwrap(), None);
    }

    #[test]
    fn targeted_failures_spare_other_writes() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0).only(&["attach_transport_id"]);
        store.create_channel(channel()).unwrap();
        let err = store.attach_transport_id(1, MessageId::new("m1"));
        assert!(matches!(err, Err(StoreError::Backend(_))));
    }

    #[test]
    fn same_seed_same_failures() {
        let run = |seed| {
            let store = ChaoticStore::with_seed(MemoryStore::new(), 0.5, seed);
            (0..32).map(|_| store.create_channel(channel()).is_ok()).collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
    }
}
