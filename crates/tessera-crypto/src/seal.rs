//! `XChaCha20-Poly1305` sealing under ratchet message keys.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, ratchet::MessageKey};

/// Full `XChaCha20` nonce length.
pub const NONCE_SIZE: usize = 24;

/// Caller-supplied random tail of the nonce.
pub const NONCE_RANDOM_SIZE: usize = 8;

/// Ciphertext plus everything a receiver needs to pick the right key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Epoch the chain belongs to
    pub epoch: u64,
    /// Chain (participant) that produced the box
    pub sender_index: u32,
    /// Ratchet generation of the message key
    pub generation: u32,
    /// Nonce, see [`seal`] for its layout
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte Poly1305 tag appended
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext`, authenticating `aad` alongside it.
///
/// Nonce layout: epoch (8, BE) | sender index (4, BE) | generation (4, BE) |
/// random (8).
pub fn seal(
    plaintext: &[u8],
    aad: &[u8],
    key: &MessageKey,
    epoch: u64,
    sender_index: u32,
    random: [u8; NONCE_RANDOM_SIZE],
) -> SealedBox {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..8].copy_from_slice(&epoch.to_be_bytes());
    nonce[8..12].copy_from_slice(&sender_index.to_be_bytes());
    nonce[12..16].copy_from_slice(&key.generation().to_be_bytes());
    nonce[16..].copy_from_slice(&random);

    let cipher = XChaCha20Poly1305::new(key.key().into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail for in-memory buffers");
    };

    SealedBox { epoch, sender_index, generation: key.generation(), nonce, ciphertext }
}

/// Decrypt a box sealed with [`seal`] under the same key and `aad`.
pub fn open(sealed: &SealedBox, aad: &[u8], key: &MessageKey) -> Result<Vec<u8>, CryptoError> {
    if key.generation() != sealed.generation {
        return Err(CryptoError::OpenFailed {
            reason: format!("key generation {} for box {}", key.generation(), sealed.generation),
        });
    }

    let cipher = XChaCha20Poly1305::new(key.key().into());
    cipher
        .decrypt(XNonce::from_slice(&sealed.nonce), Payload { msg: &sealed.ciphertext, aad })
        .map_err(|_| CryptoError::OpenFailed { reason: "authentication failed".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratchet::SymmetricRatchet;

    fn key(seed: u8) -> MessageKey {
        SymmetricRatchet::new(&[seed; 32]).advance().unwrap()
    }

    #[test]
    fn open_recovers_plaintext() {
        let k = key(1);
        let sealed = seal(b"hello", b"sid", &k, 3, 2, [0xAB; NONCE_RANDOM_SIZE]);

        assert_eq!(sealed.ciphertext.len(), 5 + 16);
        assert_eq!(&sealed.nonce[..8], &3u64.to_be_bytes());
        assert_eq!(&sealed.nonce[8..12], &2u32.to_be_bytes());
        assert_eq!(open(&sealed, b"sid", &k).unwrap(), b"hello");
    }

    #[test]
    fn aad_is_authenticated() {
        let k = key(1);
        let sealed = seal(b"hello", b"session-a", &k, 0, 0, [0; NONCE_RANDOM_SIZE]);
        assert!(open(&sealed, b"session-b", &k).is_err());
    }

    #[test]
    fn tampering_is_detected() {
        let k = key(1);
        let mut sealed = seal(b"hello", b"", &k, 0, 0, [0; NONCE_RANDOM_SIZE]);
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(
            open(&sealed, b"", &k),
            Err(CryptoError::OpenFailed { reason }) if reason.contains("authentication")
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = seal(b"hello", b"", &key(1), 0, 0, [0; NONCE_RANDOM_SIZE]);
        assert!(open(&sealed, b"", &key(2)).is_err());
    }
}
