//! HMAC-SHA256 chain ratchet producing one-shot message keys.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const CHAIN_LABEL: &[u8] = b"tessera.chain";
const MESSAGE_LABEL: &[u8] = b"tessera.message";

/// Largest forward jump a receiver makes to catch up with a sender. Also the
/// number of skipped keys retained for late messages.
pub const MAX_SKIP: u32 = 1000;

/// Key for exactly one seal or open. Zeroized on drop.
pub struct MessageKey {
    key: [u8; 32],
    generation: u32,
}

impl MessageKey {
    /// Raw AEAD key.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Ratchet step this key belongs to.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Forward-secure symmetric ratchet.
///
/// Each step derives a message key and the next chain key from the current
/// chain key, then overwrites the current one. Equal seeds yield equal key
/// sequences, which is what lets both ends of a session agree on keys without
/// further coordination.
///
/// Receivers keep the keys of generations they skipped over, at most
/// [`MAX_SKIP`] of them, so late messages still open. The oldest are dropped
/// first.
pub struct SymmetricRatchet {
    chain_key: [u8; 32],
    generation: u32,
    skipped: BTreeMap<u32, MessageKey>,
}

impl SymmetricRatchet {
    /// Ratchet positioned at generation 0.
    pub fn new(seed: &[u8; 32]) -> Self {
        Self { chain_key: *seed, generation: 0, skipped: BTreeMap::new() }
    }

    /// Generation of the next key [`advance`](Self::advance) will return.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of skipped keys held for late messages.
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Derive the key for the current generation and move one step forward.
    pub fn advance(&mut self) -> Result<MessageKey, CryptoError> {
        if self.generation == u32::MAX {
            return Err(CryptoError::GenerationOverflow { current: self.generation });
        }

        let key = step(&self.chain_key, MESSAGE_LABEL);
        let mut next = step(&self.chain_key, CHAIN_LABEL);
        std::mem::swap(&mut self.chain_key, &mut next);
        next.zeroize();

        let generation = self.generation;
        self.generation += 1;
        Ok(MessageKey { key, generation })
    }

    /// Skip forward to `target` and return its key, keeping the keys passed
    /// over for late messages. A retained skipped key is handed out once.
    pub fn advance_to(&mut self, target: u32) -> Result<MessageKey, CryptoError> {
        self.open_with(target, |key| Ok(MessageKey { key: key.key, generation: key.generation }))
    }

    /// Run `use_key` with the key for `target` and commit the ratchet only if
    /// it succeeds.
    ///
    /// Failed attempts, such as a box that does not authenticate, leave the
    /// chain and the skipped keys exactly as they were. A forged generation
    /// can therefore not push the receiver past messages it has yet to see.
    ///
    /// # Errors
    ///
    /// - `CryptoError::GenerationOutOfReach` if `target` was already consumed
    ///   or lies more than [`MAX_SKIP`] ahead.
    /// - Whatever `use_key` returns.
    pub fn open_with<T>(
        &mut self,
        target: u32,
        use_key: impl FnOnce(&MessageKey) -> Result<T, CryptoError>,
    ) -> Result<T, CryptoError> {
        if let Some(key) = self.skipped.get(&target) {
            let out = use_key(key)?;
            self.skipped.remove(&target);
            return Ok(out);
        }

        if target < self.generation || target - self.generation > MAX_SKIP {
            return Err(CryptoError::GenerationOutOfReach {
                current: self.generation,
                requested: target,
            });
        }
        if target == u32::MAX {
            return Err(CryptoError::GenerationOverflow { current: self.generation });
        }

        let mut staged = Staged { chain_key: self.chain_key, passed: Vec::new() };
        for generation in self.generation..target {
            let key = step(&staged.chain_key, MESSAGE_LABEL);
            staged.passed.push(MessageKey { key, generation });
            staged.chain_key = step(&staged.chain_key, CHAIN_LABEL);
        }
        let key = MessageKey { key: step(&staged.chain_key, MESSAGE_LABEL), generation: target };
        let out = use_key(&key)?;

        self.chain_key.zeroize();
        self.chain_key = step(&staged.chain_key, CHAIN_LABEL);
        self.generation = target + 1;
        for passed in staged.passed.drain(..) {
            self.skipped.insert(passed.generation, passed);
        }
        while self.skipped.len() > MAX_SKIP as usize {
            self.skipped.pop_first();
        }
        Ok(out)
    }
}

/// Chain position computed ahead of a commit.
struct Staged {
    chain_key: [u8; 32],
    passed: Vec<MessageKey>,
}

impl Drop for Staged {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

fn step(chain_key: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let Ok(mut mac) = HmacSha256::new_from_slice(chain_key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);

    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

impl Drop for SymmetricRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}
