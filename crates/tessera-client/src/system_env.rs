//! Production environment: system clock and OS randomness.

use tessera_core::Environment;

/// Wall clock from `SystemTime`, randomness from getrandom.
///
/// # Panics
///
/// Panics if the OS RNG fails. A client without working randomness cannot
/// produce safe nonces or session secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// System environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();
        let (mut a, mut b) = ([0u8; 32], [0u8; 32]);
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn clock_is_after_2020() {
        assert!(SystemEnv::new().now_millis() > 1_577_836_800_000);
    }
}
