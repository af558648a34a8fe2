//! Environment abstraction for deterministic testing.
//!
//! Decouples key lifecycle logic from system resources (time, randomness).
//! Tests drive a virtual clock and fixed confounders; production uses
//! [`SystemEnv`](crate::SystemEnv).

use std::{fmt::Debug, ops::Sub, time::Duration};

/// A point in time that can be moved forward without wrapping.
pub trait Timestamp: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration> {
    /// `self + by`, or `None` if the result is not representable.
    fn checked_add(self, by: Duration) -> Option<Self>;
}

impl Timestamp for std::time::Instant {
    fn checked_add(self, by: Duration) -> Option<Self> {
        std::time::Instant::checked_add(&self, by)
    }
}

impl Timestamp for Duration {
    fn checked_add(self, by: Duration) -> Option<Self> {
        Duration::checked_add(self, by)
    }
}

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while tests use a
    /// manually advanced virtual instant.
    type Instant: Timestamp;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// Used for encryption confounders.
    fn random_bytes(&self, buffer: &mut [u8]);
}
