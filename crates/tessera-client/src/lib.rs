//! Tessera client.
//!
//! Message pipelines on top of [`tessera_core`], plus a ratchet-based
//! [`SessionProvider`](tessera_core::SessionProvider).
//!
//! # Components
//!
//! - [`MessageProcessor`]: decrypts, decodes, persists and notifies inbound
//!   messages; takes in service messages and receipts
//! - [`MessageSender`]: persists, gates, encrypts and dispatches outbound
//!   messages and settles their status
//! - [`ReadReceipts`]: marks the open channel read
//! - [`InboundRouter`]: feeds transport events into the above
//! - [`RatchetProvider`]: X25519 pairwise sessions and epoch-keyed group
//!   sessions over [`tessera_crypto`]
//! - [`Client`]: one of each, sharing a [`Context`]
//!
//! # Concurrency
//!
//! Pipelines run on the caller's tokio runtime. The shared [`Context`] holds
//! only the session registry (with its own per-channel locks), the connection
//! monitor and the active channel. Persisted state lives in the
//! [`Store`](tessera_core::Store).

#![forbid(unsafe_code)]

mod body;
mod client;
mod config;
mod context;
mod error;
mod processor;
mod provider;
mod receipts;
mod router;
mod sender;
mod status;
mod system_env;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_PLACEHOLDER_BODY, DEFAULT_PREVIEW_MAX_CHARS};
pub use context::{Context, Services};
pub use error::{ContentError, ProcessError, SendError, SendFailure};
pub use processor::{MessageProcessor, Processed};
pub use provider::{RETAINED_EPOCHS, RatchetProvider};
pub use receipts::ReadReceipts;
pub use router::InboundRouter;
pub use sender::{MessageSender, Outgoing, SendHandle, SendReceipt};
pub use status::{OutboundStatus, Settle};
pub use system_env::SystemEnv;
