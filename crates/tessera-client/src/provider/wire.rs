//! CBOR encodings of sealed messages and group tickets.

use serde::{Deserialize, Serialize};
use tessera_core::ProviderError;
use tessera_crypto::{NONCE_SIZE, SealedBox};
use tessera_proto::{Identity, SessionId};

/// Ciphertext as produced by [`RatchetProvider`](super::RatchetProvider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SealedMessage {
    pub session_id: SessionId,
    pub epoch: u64,
    pub sender_index: u32,
    pub generation: u32,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl SealedMessage {
    pub(crate) fn new(session_id: SessionId, sealed: SealedBox) -> Self {
        Self {
            session_id,
            epoch: sealed.epoch,
            sender_index: sealed.sender_index,
            generation: sealed.generation,
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        }
    }

    pub(crate) fn sealed_box(&self) -> SealedBox {
        SealedBox {
            epoch: self.epoch,
            sender_index: self.sender_index,
            generation: self.generation,
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, ProviderError> {
        ciborium::de::from_reader(bytes).map_err(|e| ProviderError::DecryptionFailed {
            reason: format!("unreadable ciphertext: {e}"),
        })
    }
}

/// Everything a member needs to derive one group epoch.
///
/// Members are sorted; a participant's chain index is its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TicketBody {
    pub session_id: SessionId,
    pub epoch: u64,
    pub secret: [u8; 32],
    pub members: Vec<Identity>,
}

impl TicketBody {
    pub(crate) fn index_of(&self, identity: &Identity) -> Option<u32> {
        self.members.binary_search(identity).ok().map(|i| i as u32)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, ProviderError> {
        let body: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| ProviderError::InvalidTicket { reason: e.to_string() })?;
        if !body.members.is_sorted() {
            return Err(ProviderError::InvalidTicket { reason: "members not sorted".to_string() });
        }
        Ok(body)
    }
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    let Ok(()) = ciborium::ser::into_writer(value, &mut buf) else {
        unreachable!("fixed-shape structs always serialize into a Vec");
    };
    buf
}
