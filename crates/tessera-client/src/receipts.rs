//! Read receipts for the channel the user opens.

use std::sync::Arc;

use tessera_core::{Environment, Notification, StoreError};
use tessera_proto::Identity;
use tracing::{debug, warn};

use crate::context::Context;

/// Marks channels read and tells their peers.
pub struct ReadReceipts<E: Environment> {
    ctx: Arc<Context<E>>,
}

impl<E: Environment> ReadReceipts<E> {
    /// Receipts working on `ctx`.
    pub fn new(ctx: Arc<Context<E>>) -> Self {
        Self { ctx }
    }

    /// The user opened `channel`: make it active, clear its unread counter
    /// and send a read receipt when connected.
    ///
    /// Returns whether a receipt went out. Receipt delivery failures are
    /// logged and swallowed; they never block opening the channel.
    pub async fn open_channel(&self, channel: &Identity) -> Result<bool, StoreError> {
        self.ctx.set_active_channel(Some(channel.clone()));
        self.ctx.store.reset_unread(channel)?;
        self.ctx.notify(Notification::ChannelListChanged);

        if self.ctx.connection.ensure_connected().is_err() {
            debug!(%channel, state = %self.ctx.connection.state(), "read receipt skipped");
            return Ok(false);
        }
        match self.ctx.transport.send_read_receipt(channel).await {
            Ok(()) => {
                debug!(%channel, "read receipt sent");
                Ok(true)
            },
            Err(e) => {
                warn!(%channel, error = %e, "read receipt failed");
                Ok(false)
            },
        }
    }

    /// The user left whatever channel was open.
    pub fn close_channel(&self) {
        self.ctx.set_active_channel(None);
    }
}
