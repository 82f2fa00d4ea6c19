//! Dispatch of transport events into the pipelines.

use tessera_core::{Environment, TransportEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    error::ProcessError,
    processor::{MessageProcessor, Processed},
};

/// Feeds [`TransportEvent`]s to the connection monitor and the processor.
pub struct InboundRouter<E: Environment> {
    processor: MessageProcessor<E>,
}

impl<E: Environment> InboundRouter<E> {
    /// Router delivering into `processor`.
    pub fn new(processor: MessageProcessor<E>) -> Self {
        Self { processor }
    }

    /// Handle one event.
    ///
    /// Returns what a received payload turned into, `None` for connection
    /// changes and receipts.
    pub async fn handle(&self, event: TransportEvent) -> Result<Option<Processed>, ProcessError> {
        match event {
            TransportEvent::Connection(event) => {
                self.processor.connection().apply(&event)?;
                Ok(None)
            },
            TransportEvent::Received(message) => self
                .processor
                .process_raw(
                    &message.payload,
                    &message.from,
                    message.group.as_ref(),
                    message.message_id,
                    message.kind,
                )
                .await
                .map(Some),
            TransportEvent::Receipt { message_id, from, state } => {
                self.processor.process_status_update(state, &message_id, &from)?;
                Ok(None)
            },
        }
    }

    /// Handle events until the transport closes its channel. Failures are
    /// logged; one bad message never stops the loop.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                warn!(error = %e, "inbound event failed");
            }
        }
        debug!("transport event stream closed");
    }
}
