//! Client facade wiring the pipelines to one context.

use std::sync::Arc;

use tessera_core::{ConnectionMonitor, Environment, SessionRegistry};
use tessera_proto::Identity;

use crate::{
    config::ClientConfig,
    context::{Context, Services},
    processor::MessageProcessor,
    receipts::ReadReceipts,
    router::InboundRouter,
    sender::MessageSender,
};

/// Everything a logged-in identity needs to send and receive.
pub struct Client<E: Environment> {
    ctx: Arc<Context<E>>,
    processor: MessageProcessor<E>,
    sender: MessageSender<E>,
    receipts: ReadReceipts<E>,
}

impl<E: Environment> Client<E> {
    /// Client for `identity`, disconnected, with no channel open.
    pub fn new(env: E, identity: Identity, config: ClientConfig, services: Services) -> Self {
        let ctx = Context::new(env, identity, config, services);
        Self {
            processor: MessageProcessor::new(Arc::clone(&ctx)),
            sender: MessageSender::new(Arc::clone(&ctx)),
            receipts: ReadReceipts::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Shared state.
    pub fn context(&self) -> &Arc<Context<E>> {
        &self.ctx
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        self.ctx.identity()
    }

    /// Connection state.
    pub fn connection(&self) -> &ConnectionMonitor {
        self.ctx.connection()
    }

    /// Session registry.
    pub fn registry(&self) -> &SessionRegistry<E> {
        self.ctx.registry()
    }

    /// Inbound pipeline.
    pub fn processor(&self) -> &MessageProcessor<E> {
        &self.processor
    }

    /// Outbound pipeline.
    pub fn sender(&self) -> &MessageSender<E> {
        &self.sender
    }

    /// Read receipts.
    pub fn receipts(&self) -> &ReadReceipts<E> {
        &self.receipts
    }

    /// Router feeding transport events into this client.
    pub fn router(&self) -> InboundRouter<E> {
        InboundRouter::new(self.processor.clone())
    }
}
