//! Simulation harness for Tessera.
//!
//! In-memory implementations of every collaborator trait, a deterministic
//! message network, and [`SimPeer`], a complete client wired to them. Peers
//! share a [`SimNetwork`] and a [`StaticDirectory`]; tests decide when each
//! peer drains its queue, so interleavings are explicit and reproducible.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties across all peers
//! after a scenario ran. Use [`InvariantRegistry::standard()`] for the
//! common ones.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chaotic_store;
mod directory;
pub mod invariants;
mod memory_store;
mod network;
mod peer;
mod sink;

pub use chaotic_store::ChaoticStore;
pub use directory::StaticDirectory;
pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, PeerSnapshot, SystemSnapshot, Violation,
};
pub use memory_store::MemoryStore;
pub use network::{SentRecord, SimNetwork, SimTransport};
pub use peer::SimPeer;
pub use sink::RecordingSink;
