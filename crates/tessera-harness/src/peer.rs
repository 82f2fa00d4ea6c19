//! A complete simulated client.

use std::sync::Arc;

use tessera_client::{
    Client, ClientConfig, Outgoing, ProcessError, Processed, RatchetProvider, SendFailure,
    SendReceipt, Services,
};
use tessera_core::{
    Card, ConnectionEvent, StoredMessage, Store, TransportEvent, env::test_utils::MockEnv,
};
use tessera_proto::Identity;

use crate::{MemoryStore, RecordingSink, SimNetwork, StaticDirectory};

/// One identity with its own store, provider and sink on a shared network.
pub struct SimPeer {
    /// Client under test
    pub client: Client<MockEnv>,
    /// Store behind the client
    pub store: MemoryStore,
    /// Notifications the client emitted
    pub sink: Arc<RecordingSink>,
    /// Session provider behind the client
    pub provider: Arc<RatchetProvider<MockEnv>>,
    /// Environment; clones share the clock
    pub env: MockEnv,
    network: SimNetwork,
}

impl SimPeer {
    /// Peer named `name`, publishing its card to `directory`.
    pub fn new(name: &str, seed: u64, network: &SimNetwork, directory: &StaticDirectory) -> Self {
        let store = MemoryStore::new();
        Self::with_store(name, seed, network, directory, Arc::new(store.clone()), store)
    }

    /// Peer whose client writes through `store` (for fault injection) while
    /// `inspect` is the underlying in-memory store.
    pub fn with_store(
        name: &str,
        seed: u64,
        network: &SimNetwork,
        directory: &StaticDirectory,
        store: Arc<dyn Store>,
        inspect: MemoryStore,
    ) -> Self {
        let identity = Identity::new(name);
        let env = MockEnv::with_seed(seed);
        let provider = Arc::new(RatchetProvider::generate(env.clone(), identity.clone()));
        directory.publish(provider.card());

        let sink = Arc::new(RecordingSink::new());
        let services = Services {
            provider: provider.clone(),
            store,
            transport: Arc::new(network.transport(identity.clone())),
            directory: Arc::new(directory.clone()),
            sink: sink.clone(),
        };
        let client = Client::new(env.clone(), identity, ClientConfig::default(), services);

        Self { client, store: inspect, sink, provider, env, network: network.clone() }
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        self.client.identity()
    }

    /// Public card.
    pub fn card(&self) -> Card {
        self.provider.card()
    }

    /// Walk the connection state machine to `connected`.
    pub fn connect(&self) {
        for event in [ConnectionEvent::ConnectRequested, ConnectionEvent::Authenticated] {
            if let Err(e) = self.client.connection().apply(&event) {
                tracing::debug!(error = %e, "connect step skipped");
            }
        }
    }

    /// Drop the connection.
    pub fn lose_connection(&self) {
        let lost = ConnectionEvent::TransportLost { reason: "simulated".into() };
        if let Err(e) = self.client.connection().apply(&lost) {
            tracing::debug!(error = %e, "already disconnected");
        }
    }

    /// Send a text message to a peer or group.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, SendFailure> {
        self.client.sender().send(&Identity::new(to), Outgoing::text(body)).await
    }

    /// Handle every event queued for this peer, in order.
    pub async fn deliver(&self) -> Vec<Result<Option<Processed>, ProcessError>> {
        let router = self.client.router();
        let mut results = Vec::new();
        for event in self.network.take_events(self.identity()) {
            results.push(router.handle(event).await);
        }
        results
    }

    /// Queued events without handling them.
    pub fn take_events(&self) -> Vec<TransportEvent> {
        self.network.take_events(self.identity())
    }

    /// Messages in `channel`, oldest first.
    pub fn messages(&self, channel: &str) -> Vec<StoredMessage> {
        self.store.messages(&Identity::new(channel)).unwrap_or_default()
    }
}
