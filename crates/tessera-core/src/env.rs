//! Environment abstraction for deterministic testing.
//!
//! Protocol logic takes its clock and entropy from an [`Environment`] so that
//! tests can replay exact sequences (seeded RNG, manual clock) while production
//! uses the system clock and OS entropy.

/// Clock and randomness used by the session and message pipelines.
///
/// # Invariants
///
/// - `now_millis()` never goes backwards within one process
/// - `random_bytes()` is cryptographically secure in production and
///   reproducible for a given seed in tests
pub trait Environment: Clone + Send + Sync + 'static {
    /// Wall clock, Unix milliseconds. Used for envelope and message dates.
    fn now_millis(&self) -> u64;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, for identifiers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Deterministic environment for tests and simulations.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    };

    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::Environment;

    /// Start of the mock clock: 2024-01-01T00:00:00Z.
    pub const MOCK_EPOCH_MILLIS: u64 = 1_704_067_200_000;

    /// Seeded RNG with a manually advanced clock. Clones share state.
    #[derive(Clone)]
    pub struct MockEnv {
        rng: Arc<Mutex<ChaCha20Rng>>,
        clock: Arc<AtomicU64>,
    }

    impl MockEnv {
        /// Environment whose random stream is fixed by `seed`.
        pub fn with_seed(seed: u64) -> Self {
            Self {
                rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
                clock: Arc::new(AtomicU64::new(MOCK_EPOCH_MILLIS)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, millis: u64) {
            self.clock.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::with_seed(0)
        }
    }

    impl Environment for MockEnv {
        fn now_millis(&self) -> u64 {
            self.clock.load(Ordering::SeqCst)
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
        }
    }

}
