//! Error types for ratchet and sealing operations

use thiserror::Error;

/// Errors from ratchet and AEAD operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Requested generation is behind the ratchet or beyond the skip window
    #[error("ratchet cannot reach generation {requested} from {current}")]
    GenerationOutOfReach {
        /// Current ratchet generation
        current: u32,
        /// Requested generation
        requested: u32,
    },

    /// Ratchet generation would overflow
    #[error("ratchet generation overflow at {current}")]
    GenerationOverflow {
        /// Generation when overflow was detected
        current: u32,
    },

    /// Authentication tag mismatch, wrong key or tampered bytes
    #[error("open failed: {reason}")]
    OpenFailed {
        /// Why the box could not be opened
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if retrying with synchronized state could succeed.
    ///
    /// A failed open never becomes valid later; a generation outside the
    /// window may once the missing messages arrive.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::GenerationOutOfReach { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_is_not_recoverable() {
        let err = CryptoError::OpenFailed { reason: "tag mismatch".to_string() };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn out_of_reach_is_recoverable() {
        let err = CryptoError::GenerationOutOfReach { current: 4, requested: 2 };
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "ratchet cannot reach generation 2 from 4");
    }
}
