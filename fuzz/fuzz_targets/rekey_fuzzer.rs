//! Fuzz target for the rekey lifecycle
//!
//! Drives a client/server pair through arbitrary interleavings of sends,
//! rekeys, clock advances and pruning.
//!
//! # Invariants
//!
//! - Key numbers only increase
//! - A packet delivered straight after sending always opens on the peer
//! - Retired count never decreases
//! - Nothing panics

#![no_main]

use std::{
    ops::Sub,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rxgk_core::{ContextManager, Environment, RekeyPolicy, Role, Timestamp, TransportError};
use rxgk_crypto::{SegmentedBuffer, ENCTYPE_AES256_CTS_HMAC_SHA1_96};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FuzzInstant(Duration);

impl Timestamp for FuzzInstant {
    fn checked_add(self, by: Duration) -> Option<Self> {
        self.0.checked_add(by).map(Self)
    }
}

impl Sub for FuzzInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

#[derive(Debug, Clone, Default)]
struct FuzzEnv {
    secs: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    type Instant = FuzzInstant;

    fn now(&self) -> FuzzInstant {
        FuzzInstant(Duration::from_secs(self.secs.load(Ordering::SeqCst)))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x42);
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Send { payload: Vec<u8>, deliver: bool },
    Rekey { fill: u8 },
    Advance { secs: u8 },
    Prune,
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    retained: u8,
    byte_lifetime: u16,
    ops: Vec<Op>,
}

fuzz_target!(|scenario: Scenario| {
    let env = FuzzEnv::default();
    let policy = RekeyPolicy {
        byte_lifetime: u64::from(scenario.byte_lifetime),
        rekey_after_bytes: u64::from(scenario.byte_lifetime) / 2,
        key_lifetime: Duration::from_secs(120),
        rekey_margin: Duration::from_secs(20),
        rx_grace: Duration::from_secs(10),
        retained_generations: usize::from(scenario.retained % 8),
    };
    let etype = ENCTYPE_AES256_CTS_HMAC_SHA1_96;
    let key = [0u8; 32];
    let client =
        ContextManager::new(env.clone(), Role::Client, etype, &key, policy.clone()).unwrap();
    let server = ContextManager::new(env.clone(), Role::Server, etype, &key, policy).unwrap();

    let mut last_key_number = 0;
    let mut last_retired = 0;
    for op in scenario.ops {
        match op {
            Op::Send { payload, deliver } => {
                let enctype = client.enctype();
                let data = enctype.conf_len..enctype.conf_len + payload.len();
                let mut bytes = vec![0u8; enctype.encrypted_len(payload.len())];
                bytes[data.clone()].copy_from_slice(&payload);
                let mut buf = SegmentedBuffer::chunked(&bytes, 64);

                let sealed = match client.encrypt(&mut buf, 0..bytes.len(), data) {
                    Ok(sealed) => sealed,
                    Err(TransportError::KeyExpired { .. } | TransportError::Crypto(_)) => continue,
                    Err(err) => panic!("unexpected send failure: {err}"),
                };
                if deliver {
                    let (offset, len) =
                        server.decrypt(sealed.wire_key_number, &mut buf, 0, sealed.len).unwrap();
                    let plain = buf.gather(offset..offset + len).unwrap();
                    assert_eq!(plain.as_slice(), payload.as_slice());
                }
            },
            Op::Rekey { fill } => {
                let key = [fill; 32];
                let (Ok(a), Ok(b)) = (server.rekey(&key), client.rekey(&key)) else {
                    panic!("rekey with a valid key failed");
                };
                assert_eq!(a, b);
                assert!(a > last_key_number);
                last_key_number = a;
            },
            Op::Advance { secs } => {
                env.secs.fetch_add(u64::from(secs), Ordering::SeqCst);
            },
            Op::Prune => {
                client.prune();
                server.prune();
            },
        }
        let retired = client.retired_count();
        assert!(retired >= last_retired);
        last_retired = retired;
    }
});
