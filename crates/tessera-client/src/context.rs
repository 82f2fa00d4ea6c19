//! Shared client state.
//!
//! One [`Context`] per logged-in identity. The pipelines hold it behind an
//! `Arc`; nothing in here is global.

use std::sync::{Arc, PoisonError, RwLock};

use tessera_core::{
    Card, CardDirectory, Channel, Collaborators, ConnectionMonitor, Environment, Notification,
    NotificationSink, SessionError, SessionProvider, SessionRegistry, Store, Transport,
};
use tessera_proto::Identity;
use tracing::debug;

use crate::config::ClientConfig;

/// External services a client runs on.
#[derive(Clone)]
pub struct Services {
    /// Cryptographic sessions
    pub provider: Arc<dyn SessionProvider>,
    /// Persistence
    pub store: Arc<dyn Store>,
    /// Delivery
    pub transport: Arc<dyn Transport>,
    /// Card lookup
    pub directory: Arc<dyn CardDirectory>,
    /// Presentation layer
    pub sink: Arc<dyn NotificationSink>,
}

/// State shared by the inbound and outbound pipelines.
pub struct Context<E: Environment> {
    pub(crate) env: E,
    pub(crate) config: ClientConfig,
    pub(crate) provider: Arc<dyn SessionProvider>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) directory: Arc<dyn CardDirectory>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    pub(crate) registry: SessionRegistry<E>,
    pub(crate) connection: ConnectionMonitor,
    active_channel: RwLock<Option<Identity>>,
}

impl<E: Environment> Context<E> {
    /// Context for `identity`, starting disconnected with no channel open.
    pub fn new(env: E, identity: Identity, config: ClientConfig, services: Services) -> Arc<Self> {
        let registry = SessionRegistry::new(env.clone(), identity, Collaborators {
            provider: Arc::clone(&services.provider),
            store: Arc::clone(&services.store),
            transport: Arc::clone(&services.transport),
            directory: Arc::clone(&services.directory),
        });

        Arc::new(Self {
            env,
            config,
            provider: services.provider,
            store: services.store,
            transport: services.transport,
            directory: services.directory,
            sink: services.sink,
            registry,
            connection: ConnectionMonitor::new(),
            active_channel: RwLock::new(None),
        })
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        self.registry.identity()
    }

    /// Session registry.
    pub fn registry(&self) -> &SessionRegistry<E> {
        &self.registry
    }

    /// Connection state shared by every pipeline.
    pub fn connection(&self) -> &ConnectionMonitor {
        &self.connection
    }

    /// Persistent store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Channel the user is looking at, if any.
    pub fn active_channel(&self) -> Option<Identity> {
        self.active_channel.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record which channel the user is looking at.
    pub fn set_active_channel(&self, channel: Option<Identity>) {
        debug!(channel = ?channel.as_ref().map(Identity::as_str), "active channel");
        *self.active_channel.write().unwrap_or_else(PoisonError::into_inner) = channel;
    }

    pub(crate) fn is_active(&self, channel: &Identity) -> bool {
        self.active_channel.read().unwrap_or_else(PoisonError::into_inner).as_ref() == Some(channel)
    }

    pub(crate) fn notify(&self, notification: Notification) {
        self.sink.notify(notification);
    }

    /// Single channel with `peer`, created from their directory card on
    /// first contact.
    pub(crate) async fn channel_for_peer(&self, peer: &Identity) -> Result<Channel, SessionError> {
        if let Some(channel) = self.store.get_channel(peer)? {
            return Ok(channel);
        }
        let card: Card = self.directory.find_card(peer).await?;
        let channel = self.store.create_channel(Channel::single(card))?;
        debug!(%peer, "created single channel");
        self.notify(Notification::ChannelListChanged);
        Ok(channel)
    }
}
