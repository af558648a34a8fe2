//! Production Environment implementation using system time and RNG.

use crate::env::Environment;

/// Production environment using `std::time::Instant` and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A transport without functioning randomness
/// cannot produce confounders, and continuing would weaken every packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
