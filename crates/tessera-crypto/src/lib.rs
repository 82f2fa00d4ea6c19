//! Tessera Cryptographic Primitives
//!
//! Building blocks used by session providers. Every function is pure; callers
//! supply random bytes so that tests stay deterministic.
//!
//! # Key Lifecycle
//!
//! ```text
//! Pairwise: X25519 shared secret ─┐
//!                                 ├─ HKDF → Session Root ─┐
//! Group:    random epoch secret ──┘                       │
//!                                                         ▼
//!                            HKDF(root, epoch, sender) → Chain Seed
//!                                                         │
//!                                                         ▼
//!                                   Symmetric Ratchet → Message Keys
//!                                                         │
//!                                                         ▼
//!                                 XChaCha20-Poly1305 (AAD = session id)
//! ```
//!
//! Message keys are used for exactly one seal/open and are zeroized on drop.
//! Chain keys are overwritten on every ratchet step, so a compromised ratchet
//! state does not expose earlier messages. A new epoch re-derives every chain
//! seed from fresh secret material.

#![forbid(unsafe_code)]

mod derivation;
mod error;
mod ratchet;
mod seal;

pub use derivation::{derive_chain_seed, derive_session_id, derive_session_root};
pub use error::CryptoError;
pub use ratchet::{MAX_SKIP, MessageKey, SymmetricRatchet};
pub use seal::{NONCE_RANDOM_SIZE, NONCE_SIZE, SealedBox, open, seal};
