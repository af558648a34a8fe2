//! Transport key generations
//!
//! A [`TransportKeyContext`] holds every key derived from one transport key:
//! send and receive encryption pairs, send and receive MIC keys, and the
//! response key. It tracks its byte budget and expiry and raises the
//! needs-rekey signal. Time is passed in by the caller.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐ threshold / expiry near ┌────────────┐
//! │ Active │────────────────────────>│ NeedsRekey │
//! └────────┘                         └────────────┘
//!      │                                   │
//!      │ newer generation installed        │
//!      ↓                                   ↓
//! ┌────────────┐     last reference dropped    ┌─────────┐
//! │ Superseded │──────────────────────────────>│ Retired │
//! └────────────┘                               └─────────┘
//! ```
//!
//! Transitions only move forward.

use std::{
    fmt,
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use rxgk_crypto::{
    ChecksumKey, Confounder, EncKeyPair, Enctype, ErrorClass, Krb5Error, SegmentedBuffer, codec,
    derive_checksum_key, derive_enc_keys,
};
use tracing::{debug, error, info, warn};

use crate::{env::Timestamp, error::TransportError, policy::RekeyPolicy};

/// Key usage for packets encrypted by the client.
pub const RXGK_CLIENT_ENC_PACKET: u32 = 1026;
/// Key usage for packet MICs computed by the client.
pub const RXGK_CLIENT_MIC_PACKET: u32 = 1027;
/// Key usage for packets encrypted by the server.
pub const RXGK_SERVER_ENC_PACKET: u32 = 1028;
/// Key usage for packet MICs computed by the server.
pub const RXGK_SERVER_MIC_PACKET: u32 = 1029;
/// Key usage for the client's encrypted challenge response.
pub const RXGK_CLIENT_ENC_RESPONSE: u32 = 1030;
/// Key usage for tokens the server encrypts for itself.
pub const RXGK_SERVER_ENC_TOKEN: u32 = 1036;

/// Which end of the connection this side is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiator of the connection
    Client,
    /// Acceptor of the connection
    Server,
}

impl Role {
    /// Usage of the keys this side encrypts with.
    pub fn tx_enc_usage(self) -> u32 {
        match self {
            Self::Client => RXGK_CLIENT_ENC_PACKET,
            Self::Server => RXGK_SERVER_ENC_PACKET,
        }
    }

    /// Usage of the keys this side decrypts with.
    pub fn rx_enc_usage(self) -> u32 {
        self.peer().tx_enc_usage()
    }

    /// Usage of the key this side computes MICs with.
    pub fn tx_mic_usage(self) -> u32 {
        match self {
            Self::Client => RXGK_CLIENT_MIC_PACKET,
            Self::Server => RXGK_SERVER_MIC_PACKET,
        }
    }

    /// Usage of the key this side verifies MICs with.
    pub fn rx_mic_usage(self) -> u32 {
        self.peer().tx_mic_usage()
    }

    /// The other end.
    pub fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

/// Lifecycle state of a key generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyState {
    /// Current generation within its limits
    Active,
    /// Current generation past its byte threshold or close to expiry
    NeedsRekey,
    /// Replaced by a newer generation, still held for in-flight traffic
    Superseded,
    /// Last reference dropped and keys zeroed
    Retired,
}

/// One generation of derived transport keys.
pub struct TransportKeyContext<I> {
    key_number: u32,
    enctype: &'static Enctype,
    /// `None` when the lifetime runs past the end of the clock
    expiry: Option<I>,
    rekey_margin: Duration,
    rx_grace: Duration,
    rekey_threshold: i64,
    bytes_remaining: AtomicI64,
    needs_rekey: AtomicBool,
    superseded: AtomicBool,
    tx_enc: EncKeyPair,
    rx_enc: EncKeyPair,
    tx_kc: ChecksumKey,
    rx_kc: ChecksumKey,
    resp_enc: EncKeyPair,
    retire_counter: Option<Arc<AtomicU64>>,
}

/// Derive every key of generation `key_number` from `base_key`.
///
/// Send and receive usages are mirrored by `role`; the response key uses the
/// client response usage on both sides. The generation expires
/// `policy.key_lifetime` after `now`, or never if that instant is not
/// representable. Any failed derivation aborts the whole
/// generation and the keys derived so far are zeroed as they drop.
pub fn generate_transport_key<I>(
    enctype: &'static Enctype,
    base_key: &[u8],
    role: Role,
    key_number: u32,
    policy: &RekeyPolicy,
    now: I,
) -> Result<TransportKeyContext<I>, Krb5Error>
where
    I: Timestamp,
{
    let tx_enc = derive_enc_keys(enctype, base_key, role.tx_enc_usage())?;
    let rx_enc = derive_enc_keys(enctype, base_key, role.rx_enc_usage())?;
    let tx_kc = derive_checksum_key(enctype, base_key, role.tx_mic_usage())?;
    let rx_kc = derive_checksum_key(enctype, base_key, role.rx_mic_usage())?;
    let resp_enc = derive_enc_keys(enctype, base_key, RXGK_CLIENT_ENC_RESPONSE)?;

    Ok(TransportKeyContext {
        key_number,
        enctype,
        expiry: now.checked_add(policy.key_lifetime),
        rekey_margin: policy.rekey_margin,
        rx_grace: policy.rx_grace,
        rekey_threshold: policy.rekey_threshold(),
        bytes_remaining: AtomicI64::new(policy.initial_budget()),
        needs_rekey: AtomicBool::new(false),
        superseded: AtomicBool::new(false),
        tx_enc,
        rx_enc,
        tx_kc,
        rx_kc,
        resp_enc,
        retire_counter: None,
    })
}

impl<I> TransportKeyContext<I>
where
    I: Timestamp,
{
    /// Generation number.
    pub fn key_number(&self) -> u32 {
        self.key_number
    }

    /// Key number as carried in the 16-bit packet header field.
    pub fn wire_key_number(&self) -> u16 {
        (self.key_number & 0xffff) as u16
    }

    /// Enctype the keys were derived for.
    pub fn enctype(&self) -> &'static Enctype {
        self.enctype
    }

    /// Time after which no new outgoing traffic is accepted, if any.
    pub fn expiry(&self) -> Option<I> {
        self.expiry
    }

    /// Transmit budget left. Negative once overdrawn.
    pub fn bytes_remaining(&self) -> i64 {
        self.bytes_remaining.load(Ordering::Acquire)
    }

    /// Lifecycle state at `now`.
    ///
    /// A live context is never [`KeyState::Retired`]; that state is only
    /// observable through the manager once the last reference is gone.
    pub fn state(&self, now: I) -> KeyState {
        if self.superseded.load(Ordering::Acquire) {
            KeyState::Superseded
        } else if self.needs_rekey.load(Ordering::Acquire)
            || self.bytes_remaining() <= self.rekey_threshold
            || self.expiry.is_some_and(|expiry| {
                now.checked_add(self.rekey_margin).is_none_or(|soon| soon >= expiry)
            })
        {
            KeyState::NeedsRekey
        } else {
            KeyState::Active
        }
    }

    /// True if this generation is current and should be replaced.
    pub fn needs_rekey(&self, now: I) -> bool {
        self.state(now) == KeyState::NeedsRekey
    }

    /// True once incoming traffic for this generation is no longer accepted.
    pub fn rx_window_closed(&self, now: I) -> bool {
        self.expiry
            .and_then(|expiry| expiry.checked_add(self.rx_grace))
            .is_some_and(|closes| now >= closes)
    }

    /// Encrypt outgoing data and debit the byte budget.
    pub fn encrypt(
        &self,
        now: I,
        buf: &mut SegmentedBuffer,
        secure: Range<usize>,
        data: Range<usize>,
        confounder: Confounder<'_>,
    ) -> Result<usize, TransportError> {
        self.check_send(now)?;
        let data_len = data.len();
        let written = codec::encrypt(self.enctype, &self.tx_enc, buf, secure, data, confounder)
            .inspect_err(|err| self.log_send_failure(err))?;
        self.debit(data_len);
        Ok(written)
    }

    /// Verify and decrypt an incoming packet region.
    pub fn decrypt(
        &self,
        now: I,
        buf: &mut SegmentedBuffer,
        offset: usize,
        len: usize,
    ) -> Result<(usize, usize), TransportError> {
        self.check_receive(now)?;
        codec::decrypt(self.enctype, &self.rx_enc, buf, offset, len)
            .inspect_err(|err| self.log_receive_failure(err))
            .map_err(TransportError::from)
    }

    /// MIC outgoing data and debit the byte budget.
    pub fn get_mic(
        &self,
        now: I,
        metadata: &[u8],
        buf: &mut SegmentedBuffer,
        secure: Range<usize>,
        data: Range<usize>,
    ) -> Result<usize, TransportError> {
        self.check_send(now)?;
        let data_len = data.len();
        let written = codec::get_mic(self.enctype, &self.tx_kc, metadata, buf, secure, data)
            .inspect_err(|err| self.log_send_failure(err))?;
        self.debit(data_len);
        Ok(written)
    }

    /// Check the MIC on an incoming packet region.
    pub fn verify_mic(
        &self,
        now: I,
        metadata: &[u8],
        buf: &SegmentedBuffer,
        offset: usize,
        len: usize,
    ) -> Result<(usize, usize), TransportError> {
        self.check_receive(now)?;
        codec::verify_mic(self.enctype, &self.rx_kc, metadata, buf, offset, len)
            .inspect_err(|err| self.log_receive_failure(err))
            .map_err(TransportError::from)
    }

    /// Encrypt a challenge response. Not counted against the byte budget.
    pub fn encrypt_response(
        &self,
        buf: &mut SegmentedBuffer,
        secure: Range<usize>,
        data: Range<usize>,
        confounder: Confounder<'_>,
    ) -> Result<usize, TransportError> {
        codec::encrypt(self.enctype, &self.resp_enc, buf, secure, data, confounder)
            .inspect_err(|err| self.log_send_failure(err))
            .map_err(TransportError::from)
    }

    /// Decrypt a challenge response.
    pub fn decrypt_response(
        &self,
        buf: &mut SegmentedBuffer,
        offset: usize,
        len: usize,
    ) -> Result<(usize, usize), TransportError> {
        codec::decrypt(self.enctype, &self.resp_enc, buf, offset, len)
            .inspect_err(|err| self.log_receive_failure(err))
            .map_err(TransportError::from)
    }

    pub(crate) fn with_retire_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.retire_counter = Some(counter);
        self
    }

    pub(crate) fn mark_superseded(&self) {
        self.superseded.store(true, Ordering::Release);
    }

    fn check_send(&self, now: I) -> Result<(), TransportError> {
        let expired = self.expiry.is_some_and(|expiry| now >= expiry);
        if expired || self.bytes_remaining() <= 0 {
            warn!(
                key_number = self.key_number,
                bytes_remaining = self.bytes_remaining(),
                "refusing to send on expired key generation"
            );
            return Err(TransportError::KeyExpired { key_number: self.key_number });
        }
        Ok(())
    }

    fn check_receive(&self, now: I) -> Result<(), TransportError> {
        if self.rx_window_closed(now) {
            warn!(key_number = self.key_number, "packet arrived after receive grace window");
            return Err(TransportError::KeyExpired { key_number: self.key_number });
        }
        Ok(())
    }

    /// Debit `len` bytes, raising the rekey flag on the one debit that
    /// crosses the threshold.
    fn debit(&self, len: usize) {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let before = self.bytes_remaining.fetch_sub(len, Ordering::AcqRel);
        let after = before.saturating_sub(len);
        if before > self.rekey_threshold && after <= self.rekey_threshold {
            self.needs_rekey.store(true, Ordering::Release);
            info!(
                key_number = self.key_number,
                bytes_remaining = after,
                "byte threshold crossed, rekey needed"
            );
        }
    }

    fn log_send_failure(&self, err: &Krb5Error) {
        if err.class() == ErrorClass::Primitive {
            error!(key_number = self.key_number, %err, "cipher failure while securing packet");
        } else {
            warn!(key_number = self.key_number, %err, "cannot secure packet");
        }
    }

    fn log_receive_failure(&self, err: &Krb5Error) {
        match err.class() {
            ErrorClass::Integrity => {
                debug!(key_number = self.key_number, "dropping packet that failed verification");
            },
            ErrorClass::Primitive => {
                error!(key_number = self.key_number, %err, "cipher failure on incoming packet");
            },
            ErrorClass::Bounds | ErrorClass::Negotiation => {
                warn!(key_number = self.key_number, %err, "malformed incoming packet");
            },
        }
    }
}

impl<I: fmt::Debug> fmt::Debug for TransportKeyContext<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportKeyContext")
            .field("key_number", &self.key_number)
            .field("enctype", &self.enctype.name)
            .field("expiry", &self.expiry)
            .field("bytes_remaining", &self.bytes_remaining.load(Ordering::Relaxed))
            .field("needs_rekey", &self.needs_rekey.load(Ordering::Relaxed))
            .field("superseded", &self.superseded.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<I> Drop for TransportKeyContext<I> {
    fn drop(&mut self) {
        if let Some(counter) = &self.retire_counter {
            counter.fetch_add(1, Ordering::AcqRel);
            debug!(key_number = self.key_number, "key generation retired");
        }
    }
}
