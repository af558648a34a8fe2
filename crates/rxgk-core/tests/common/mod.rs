//! Shared helpers for the transport core integration tests.

#![allow(dead_code)]

use std::{
    ops::{Range, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rxgk_core::{ContextManager, Environment, RekeyPolicy, Role, Timestamp};
use rxgk_crypto::{ENCTYPE_AES128_CTS_HMAC_SHA256_128, Enctype, SegmentedBuffer};

/// Virtual instant: time elapsed since the environment was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualInstant(Duration);

impl Timestamp for VirtualInstant {
    fn checked_add(self, by: Duration) -> Option<Self> {
        self.0.checked_add(by).map(Self)
    }
}

impl Sub for VirtualInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Environment with a manually advanced clock and counter-based "random"
/// bytes. Clones share the same clock.
#[derive(Debug, Clone, Default)]
pub struct ManualEnv {
    elapsed_ms: Arc<AtomicU64>,
    counter: Arc<AtomicU64>,
}

impl ManualEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for ManualEnv {
    type Instant = VirtualInstant;

    fn now(&self) -> VirtualInstant {
        VirtualInstant(Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst)))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let seed = self.counter.fetch_add(1, Ordering::SeqCst).to_be_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = seed[i % seed.len()] ^ (i as u8);
        }
    }
}

pub const ETYPE: u32 = ENCTYPE_AES128_CTS_HMAC_SHA256_128;

pub fn base_key(fill: u8) -> Vec<u8> {
    vec![fill; 16]
}

pub fn test_policy() -> RekeyPolicy {
    RekeyPolicy {
        byte_lifetime: 1500,
        rekey_after_bytes: 1000,
        key_lifetime: Duration::from_secs(60),
        rekey_margin: Duration::from_secs(10),
        rx_grace: Duration::from_secs(5),
        retained_generations: 2,
    }
}

/// Client and server managers over the same base key and clock.
pub fn connection(
    policy: RekeyPolicy,
) -> (ManualEnv, ContextManager<ManualEnv>, ContextManager<ManualEnv>) {
    let env = ManualEnv::new();
    let client =
        ContextManager::new(env.clone(), Role::Client, ETYPE, &base_key(0), policy.clone())
            .unwrap();
    let server =
        ContextManager::new(env.clone(), Role::Server, ETYPE, &base_key(0), policy).unwrap();
    (env, client, server)
}

/// Packet with room for the confounder and checksum around `payload`.
pub fn packet(
    enctype: &Enctype,
    payload: &[u8],
) -> (SegmentedBuffer, Range<usize>, Range<usize>) {
    let data = enctype.conf_len..enctype.conf_len + payload.len();
    let mut bytes = vec![0u8; enctype.encrypted_len(payload.len())];
    bytes[data.clone()].copy_from_slice(payload);
    (SegmentedBuffer::chunked(&bytes, 48), 0..bytes.len(), data)
}

/// Encrypt `payload` on `sender`; returns the buffer, wire key number and
/// length.
pub fn send(sender: &ContextManager<ManualEnv>, payload: &[u8]) -> (SegmentedBuffer, u16, usize) {
    let (mut buf, secure, data) = packet(sender.enctype(), payload);
    let sealed = sender.encrypt(&mut buf, secure, data).unwrap();
    (buf, sealed.wire_key_number, sealed.len)
}

/// Decrypt on `receiver` and return the plaintext.
pub fn receive(
    receiver: &ContextManager<ManualEnv>,
    mut buf: SegmentedBuffer,
    wire: u16,
    len: usize,
) -> Vec<u8> {
    let (offset, plain) = receiver.decrypt(wire, &mut buf, 0, len).unwrap();
    buf.gather(offset..offset + plain).unwrap().to_vec()
}
