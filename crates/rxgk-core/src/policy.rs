//! Rekey policy
//!
//! Byte and time limits that bound how long one key generation may be used.
//! None of these values is load-bearing; they are starting points a
//! transport is expected to tune.

use std::time::Duration;

/// Bytes a generation may transmit before it refuses further sends (1 GiB).
pub const DEFAULT_BYTE_LIFETIME: u64 = 1 << 30;

/// Bytes after which a rekey is requested (768 MiB).
pub const DEFAULT_REKEY_AFTER_BYTES: u64 = 3 << 28;

/// Time a generation may be used for new outgoing traffic.
pub const DEFAULT_KEY_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// How long before expiry a rekey is requested.
pub const DEFAULT_REKEY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// How long after expiry incoming traffic is still accepted.
pub const DEFAULT_RX_GRACE: Duration = Duration::from_secs(30);

/// Superseded generations kept for traffic straddling a rekey.
pub const DEFAULT_RETAINED_GENERATIONS: usize = 2;

/// Limits applied to every key generation of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyPolicy {
    /// Initial transmit budget in bytes
    pub byte_lifetime: u64,
    /// Bytes transmitted after which the generation needs rekeying
    pub rekey_after_bytes: u64,
    /// Time from installation to expiry
    pub key_lifetime: Duration,
    /// Rekey is requested once expiry is this close
    pub rekey_margin: Duration,
    /// Receive tolerance past expiry, for clock skew and in-flight packets
    pub rx_grace: Duration,
    /// Superseded generations retained for receiving
    pub retained_generations: usize,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            byte_lifetime: DEFAULT_BYTE_LIFETIME,
            rekey_after_bytes: DEFAULT_REKEY_AFTER_BYTES,
            key_lifetime: DEFAULT_KEY_LIFETIME,
            rekey_margin: DEFAULT_REKEY_MARGIN,
            rx_grace: DEFAULT_RX_GRACE,
            retained_generations: DEFAULT_RETAINED_GENERATIONS,
        }
    }
}

impl RekeyPolicy {
    /// Initial `bytes_remaining` of a generation.
    pub(crate) fn initial_budget(&self) -> i64 {
        i64::try_from(self.byte_lifetime).unwrap_or(i64::MAX)
    }

    /// `bytes_remaining` at or below which the generation needs rekeying.
    pub(crate) fn rekey_threshold(&self) -> i64 {
        let after = i64::try_from(self.rekey_after_bytes).unwrap_or(i64::MAX);
        self.initial_budget().saturating_sub(after)
    }
}
