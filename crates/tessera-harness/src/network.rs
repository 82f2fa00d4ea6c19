//! Simulated message network.
//!
//! A [`SimNetwork`] holds one event queue per identity. [`SimTransport`]s
//! attached to it push [`TransportEvent`]s into the recipients' queues, and
//! tests drain them explicitly, so delivery order is fully deterministic.
//!
//! Transport ids are assigned network-wide as `m1`, `m2`, ...

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tessera_core::{
    InboundMessage, MessageKind, MessageState, Transport, TransportError, TransportEvent,
    UploadSlot,
};
use tessera_proto::{Identity, MessageId};
use tracing::trace;

/// One accepted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    /// Sender
    pub from: Identity,
    /// Addressee (peer or group name)
    pub to: Identity,
    /// Routing class
    pub kind: MessageKind,
    /// Assigned id
    pub message_id: MessageId,
    /// Serialized envelope
    pub payload: Vec<u8>,
}

/// Shared simulated network. Clones share state.
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

#[derive(Default)]
struct NetworkInner {
    next_id: u64,
    queues: HashMap<Identity, VecDeque<TransportEvent>>,
    groups: HashMap<Identity, Vec<Identity>>,
    sent: Vec<SentRecord>,
    unreachable: HashSet<Identity>,
    stalled: HashSet<Identity>,
    delivery_receipts: bool,
    uploads: HashMap<String, Vec<u8>>,
}

impl SimNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for `identity` on this network.
    pub fn transport(&self, identity: Identity) -> SimTransport {
        SimTransport { network: self.clone(), identity }
    }

    /// Route group messages addressed to `group` to `members`.
    pub fn register_group(&self, group: Identity, members: Vec<Identity>) {
        self.lock().groups.insert(group, members);
    }

    /// Sends to `identity` fail with `TransportError::Unreachable`.
    pub fn fail_deliveries_to(&self, identity: Identity) {
        self.lock().unreachable.insert(identity);
    }

    /// Sends to `identity` never complete.
    pub fn stall_deliveries_to(&self, identity: Identity) {
        self.lock().stalled.insert(identity);
    }

    /// Undo [`fail_deliveries_to`](Self::fail_deliveries_to) and
    /// [`stall_deliveries_to`](Self::stall_deliveries_to).
    pub fn heal(&self, identity: &Identity) {
        let mut inner = self.lock();
        inner.unreachable.remove(identity);
        inner.stalled.remove(identity);
    }

    /// Answer every delivered chat or group message with a `delivered`
    /// receipt to its sender.
    pub fn enable_delivery_receipts(&self) {
        self.lock().delivery_receipts = true;
    }

    /// Queue an arbitrary event for `identity`.
    pub fn inject(&self, identity: &Identity, event: TransportEvent) {
        self.lock().queues.entry(identity.clone()).or_default().push_back(event);
    }

    /// Drain the queue of `identity`.
    pub fn take_events(&self, identity: &Identity) -> Vec<TransportEvent> {
        self.lock().queues.get_mut(identity).map(|q| q.drain(..).collect()).unwrap_or_default()
    }

    /// Every accepted send so far.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.lock().sent.clone()
    }

    /// Number of accepted sends of `kind`.
    pub fn sent_count(&self, kind: MessageKind) -> usize {
        self.lock().sent.iter().filter(|s| s.kind == kind).count()
    }

    /// Bytes uploaded for a download URL.
    pub fn uploaded(&self, url: &str) -> Option<Vec<u8>> {
        self.lock().uploads.get(url).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Admission {
    Accepted(MessageId),
    Unreachable,
    Stalled,
}

impl NetworkInner {
    fn admit(
        &mut self,
        from: &Identity,
        payload: Vec<u8>,
        to: &Identity,
        kind: MessageKind,
    ) -> Admission {
        if self.unreachable.contains(to) {
            return Admission::Unreachable;
        }
        if self.stalled.contains(to) {
            return Admission::Stalled;
        }

        self.next_id += 1;
        let message_id = MessageId::new(format!("m{}", self.next_id));
        let recipients = match (kind, self.groups.get(to)) {
            (MessageKind::Group, Some(members)) => {
                members.iter().filter(|m| *m != from).cloned().collect()
            },
            _ => vec![to.clone()],
        };
        let group = (kind == MessageKind::Group).then(|| to.clone());

        for recipient in recipients {
            self.queues.entry(recipient.clone()).or_default().push_back(TransportEvent::Received(
                InboundMessage {
                    payload: payload.clone(),
                    from: from.clone(),
                    group: group.clone(),
                    message_id: message_id.clone(),
                    kind,
                },
            ));
            if self.delivery_receipts && kind != MessageKind::Service {
                self.queues.entry(from.clone()).or_default().push_back(TransportEvent::Receipt {
                    message_id: message_id.clone(),
                    from: recipient,
                    state: MessageState::Delivered,
                });
            }
        }

        self.sent.push(SentRecord {
            from: from.clone(),
            to: to.clone(),
            kind,
            message_id: message_id.clone(),
            payload,
        });
        Admission::Accepted(message_id)
    }
}

/// [`Transport`] of one identity on a [`SimNetwork`].
#[derive(Clone)]
pub struct SimTransport {
    network: SimNetwork,
    identity: Identity,
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(
        &self,
        payload: Vec<u8>,
        to: &Identity,
        kind: MessageKind,
    ) -> Result<MessageId, TransportError> {
        let admission = self.network.lock().admit(&self.identity, payload, to, kind);
        match admission {
            Admission::Accepted(id) => {
                trace!(from = %self.identity, %to, ?kind, %id, "sim send");
                Ok(id)
            },
            Admission::Unreachable => Err(TransportError::Unreachable { to: to.clone() }),
            Admission::Stalled => std::future::pending::<Result<MessageId, TransportError>>().await,
        }
    }

    /// Marks every chat message `to` sent us as read on their side.
    async fn send_read_receipt(&self, to: &Identity) -> Result<(), TransportError> {
        let mut inner = self.network.lock();
        if inner.unreachable.contains(to) {
            return Err(TransportError::Unreachable { to: to.clone() });
        }
        let read: Vec<MessageId> = inner
            .sent
            .iter()
            .filter(|s| s.from == *to && s.to == self.identity && s.kind == MessageKind::Chat)
            .map(|s| s.message_id.clone())
            .collect();
        let queue = inner.queues.entry(to.clone()).or_default();
        for message_id in read {
            queue.push_back(TransportEvent::Receipt {
                message_id,
                from: self.identity.clone(),
                state: MessageState::Read,
            });
        }
        Ok(())
    }

    async fn request_upload_slot(
        &self,
        name: &str,
        size: usize,
    ) -> Result<UploadSlot, TransportError> {
        trace!(owner = %self.identity, name, size, "sim upload slot");
        Ok(UploadSlot {
            put_url: format!("sim://upload/{}/{name}", self.identity),
            get_url: format!("sim://media/{}/{name}", self.identity),
        })
    }

    async fn upload(&self, slot: &UploadSlot, data: Vec<u8>) -> Result<(), TransportError> {
        self.network.lock().uploads.insert(slot.get_url.clone(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::new(name)
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let network = SimNetwork::new();
        let alice = network.transport(id("alice"));
        let first = alice.send(vec![1], &id("bob"), MessageKind::Chat).await.unwrap();
        let second = alice.send(vec![2], &id("bob"), MessageKind::Chat).await.unwrap();
        assert_eq!(first.as_str(), "m1");
        assert_eq!(second.as_str(), "m2");
        assert_eq!(network.take_events(&id("bob")).len(), 2);
    }

    #[tokio::test]
    async fn group_sends_fan_out_to_everyone_else() {
        let network = SimNetwork::new();
        network.register_group(id("team"), vec![id("alice"), id("bob"), id("carol")]);
        let alice = network.transport(id("alice"));
        alice.send(vec![1], &id("team"), MessageKind::Group).await.unwrap();

        assert!(network.take_events(&id("alice")).is_empty());
        for member in ["bob", "carol"] {
            let events = network.take_events(&id(member));
            assert!(matches!(
                events.as_slice(),
                [TransportEvent::Received(InboundMessage { group: Some(g), .. })] if *g == id("team")
            ));
        }
    }

    #[tokio::test]
    async fn unreachable_peer_is_reported_and_nothing_recorded() {
        let network = SimNetwork::new();
        network.fail_deliveries_to(id("bob"));
        let alice = network.transport(id("alice"));
        let result = alice.send(vec![1], &id("bob"), MessageKind::Chat).await;
        assert!(matches!(result, Err(TransportError::Unreachable { .. })));
        assert!(network.sent().is_empty());
    }

    #[tokio::test]
    async fn read_receipt_covers_earlier_messages() {
        let network = SimNetwork::new();
        let alice = network.transport(id("alice"));
        let sent = alice.send(vec![1], &id("bob"), MessageKind::Chat).await.unwrap();
        network.transport(id("bob")).send_read_receipt(&id("alice")).await.unwrap();

        let events = network.take_events(&id("alice"));
        assert_eq!(events, vec![TransportEvent::Receipt {
            message_id: sent,
            from: id("bob"),
            state: MessageState::Read,
        }]);
    }
}
