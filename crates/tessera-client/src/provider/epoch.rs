//! Per-epoch sender chains.
//!
//! Every participant of a session epoch sends on its own symmetric ratchet,
//! seeded from the epoch root and the participant's index. Receivers hold a
//! copy of every other participant's chain and skip forward as needed. A
//! chain only moves once a box authenticates.

use std::collections::HashMap;

use tessera_crypto::{
    CryptoError, NONCE_RANDOM_SIZE, SealedBox, SymmetricRatchet, derive_chain_seed, open, seal,
};

/// Ratchets of all participants for one epoch.
///
/// # Invariants
///
/// - Every chain belongs to the same epoch and root
/// - Generations only increase
pub(crate) struct EpochKeys {
    epoch: u64,
    own_index: u32,
    chains: HashMap<u32, SymmetricRatchet>,
}

impl EpochKeys {
    /// Derive chains for participants `0..participants`.
    pub(crate) fn derive(root: &[u8; 32], epoch: u64, own_index: u32, participants: u32) -> Self {
        let chains = (0..participants)
            .map(|index| (index, SymmetricRatchet::new(&derive_chain_seed(root, epoch, index))))
            .collect();
        Self { epoch, own_index, chains }
    }

    /// Seal on our own chain.
    pub(crate) fn seal(
        &mut self,
        plaintext: &[u8],
        aad: &[u8],
        random: [u8; NONCE_RANDOM_SIZE],
    ) -> Result<SealedBox, CryptoError> {
        let own_index = self.own_index;
        let chain = self.chains.get_mut(&own_index).ok_or_else(|| unknown_chain(own_index))?;
        let key = chain.advance()?;
        Ok(seal(plaintext, aad, &key, self.epoch, own_index, random))
    }

    /// Open a box sealed on another participant's chain.
    pub(crate) fn open(&mut self, sealed: &SealedBox, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.epoch != self.epoch {
            return Err(CryptoError::OpenFailed {
                reason: format!("box for epoch {} opened with epoch {}", sealed.epoch, self.epoch),
            });
        }
        if sealed.sender_index == self.own_index {
            return Err(CryptoError::OpenFailed { reason: "box sealed on own chain".to_string() });
        }

        let chain = self
            .chains
            .get_mut(&sealed.sender_index)
            .ok_or_else(|| unknown_chain(sealed.sender_index))?;
        chain.open_with(sealed.generation, |key| open(sealed, aad, key))
    }

    #[cfg(test)]
    pub(crate) fn generation(&self, index: u32) -> Option<u32> {
        self.chains.get(&index).map(SymmetricRatchet::generation)
    }
}

fn unknown_chain(index: u32) -> CryptoError {
    CryptoError::OpenFailed { reason: format!("no chain for participant {index}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: [u8; 32] = [3; 32];

    #[test]
    fn peers_open_each_others_boxes() {
        let mut alice = EpochKeys::derive(&ROOT, 1, 0, 3);
        let mut bob = EpochKeys::derive(&ROOT, 1, 1, 3);

        let sealed = alice.seal(b"hi", b"sid", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert_eq!((sealed.epoch, sealed.sender_index, sealed.generation), (1, 0, 0));
        assert_eq!(bob.open(&sealed, b"sid").unwrap(), b"hi");
        assert_eq!(alice.generation(0), Some(1));
        assert_eq!(bob.generation(0), Some(1));
    }

    #[test]
    fn receiver_skips_missed_generations() {
        let mut alice = EpochKeys::derive(&ROOT, 0, 0, 2);
        let mut bob = EpochKeys::derive(&ROOT, 0, 1, 2);

        let _lost = alice.seal(b"one", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        let second = alice.seal(b"two", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert_eq!(bob.open(&second, b"").unwrap(), b"two");
    }

    #[test]
    fn late_boxes_open_after_newer_ones() {
        let mut alice = EpochKeys::derive(&ROOT, 0, 0, 2);
        let mut bob = EpochKeys::derive(&ROOT, 0, 1, 2);

        let first = alice.seal(b"first", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        let second = alice.seal(b"second", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert_eq!(bob.open(&second, b"").unwrap(), b"second");
        assert_eq!(bob.open(&first, b"").unwrap(), b"first");
        assert!(bob.open(&first, b"").is_err());
    }

    /// INVARIANT: a box that fails to authenticate does not move the chain.
    #[test]
    fn tampered_box_leaves_chain_unchanged() {
        let mut alice = EpochKeys::derive(&ROOT, 0, 0, 2);
        let mut bob = EpochKeys::derive(&ROOT, 0, 1, 2);

        let first = alice.seal(b"first", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        let mut forged = alice.seal(b"second", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        forged.generation = 40;
        assert!(bob.open(&forged, b"").is_err());
        assert_eq!(bob.generation(0), Some(0));

        assert_eq!(bob.open(&first, b"").unwrap(), b"first");
        assert_eq!(bob.generation(0), Some(1));
    }

    #[test]
    fn wrong_epoch_is_rejected() {
        let mut alice = EpochKeys::derive(&ROOT, 0, 0, 2);
        let mut bob = EpochKeys::derive(&ROOT, 1, 1, 2);

        let sealed = alice.seal(b"hi", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert!(bob.open(&sealed, b"").is_err());
    }

    #[test]
    fn own_boxes_are_not_reopened() {
        let mut alice = EpochKeys::derive(&ROOT, 0, 0, 2);
        let sealed = alice.seal(b"hi", b"", [0; NONCE_RANDOM_SIZE]).unwrap();
        assert!(alice.open(&sealed, b"").is_err());
    }
}
