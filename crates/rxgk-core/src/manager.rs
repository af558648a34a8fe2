//! Current-generation management and rekeying
//!
//! The manager owns the one piece of shared mutable state on a connection:
//! which generation is current. Readers clone the current `Arc` under a read
//! lock and work on their clone; a rekey derives the next generation outside
//! any lock and swaps it in under the write lock. A reader therefore sees the
//! old generation or the new one in full, and an old generation lives until
//! the last in-flight operation holding it finishes.
//!
//! Superseded generations are retained (up to
//! [`RekeyPolicy::retained_generations`]) so packets sent just before a rekey
//! still find the keys matching the key number in their header.

use std::{
    collections::VecDeque,
    ops::Range,
    sync::{
        Arc, Mutex, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use rxgk_crypto::{
    ConnectionInfo, Confounder, Enctype, Krb5Error, SegmentedBuffer, derive_transport_base_key,
    require_enctype,
};
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use crate::{
    context::{KeyState, Role, TransportKeyContext, generate_transport_key},
    env::Environment,
    error::TransportError,
    policy::RekeyPolicy,
};

type Generation<E> = Arc<TransportKeyContext<<E as Environment>::Instant>>;

/// Result of securing an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sealed {
    /// Key number to put in the packet header
    pub wire_key_number: u16,
    /// Bytes written from the start of the secure region
    pub len: usize,
}

/// Holds the current key generation of one connection and its retained
/// predecessors.
pub struct ContextManager<E: Environment> {
    env: E,
    role: Role,
    enctype: &'static Enctype,
    policy: RekeyPolicy,
    current: RwLock<Generation<E>>,
    /// Superseded generations, newest first
    retained: Mutex<VecDeque<Generation<E>>>,
    /// Generations released by the manager that may still be in use
    draining: Mutex<Vec<(u32, Weak<TransportKeyContext<E::Instant>>)>>,
    /// Serialises rekeys so key numbers are handed out once
    rekey_lock: Mutex<()>,
    retired: Arc<AtomicU64>,
}

impl<E: Environment> ContextManager<E> {
    /// Set up a connection with generation 0 derived from `base_key`.
    pub fn new(
        env: E,
        role: Role,
        enctype_id: u32,
        base_key: &[u8],
        policy: RekeyPolicy,
    ) -> Result<Self, TransportError> {
        let enctype = require_enctype(enctype_id)?;
        let retired = Arc::new(AtomicU64::new(0));
        let initial = generate_transport_key(enctype, base_key, role, 0, &policy, env.now())?
            .with_retire_counter(Arc::clone(&retired));

        info!(enctype = enctype.name, ?role, "installed initial key generation");

        Ok(Self {
            env,
            role,
            enctype,
            policy,
            current: RwLock::new(Arc::new(initial)),
            retained: Mutex::new(VecDeque::new()),
            draining: Mutex::new(Vec::new()),
            rekey_lock: Mutex::new(()),
            retired,
        })
    }

    /// Which end of the connection this manager serves.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Enctype negotiated for the connection.
    pub fn enctype(&self) -> &'static Enctype {
        self.enctype
    }

    /// Policy applied to each generation.
    pub fn policy(&self) -> &RekeyPolicy {
        &self.policy
    }

    /// The generation new outgoing traffic uses.
    pub fn current(&self) -> Generation<E> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The generation matching a key number read from a packet header.
    pub fn context_for(&self, wire_key_number: u16) -> Result<Generation<E>, TransportError> {
        let current = self.current();
        if current.wire_key_number() == wire_key_number {
            return Ok(current);
        }

        let retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        retained
            .iter()
            .find(|ctx| ctx.wire_key_number() == wire_key_number)
            .cloned()
            .ok_or(TransportError::UnknownKeyNumber { wire: wire_key_number })
    }

    /// True if the current generation wants replacing.
    pub fn rekey_pending(&self) -> bool {
        self.current().needs_rekey(self.env.now())
    }

    /// Install a new generation derived from `base_key`.
    ///
    /// Returns the new key number. On failure the current generation stays
    /// installed and keeps refusing sends once it expires.
    pub fn rekey(&self, base_key: &[u8]) -> Result<u32, TransportError> {
        self.rekey_with(|_| Ok(Zeroizing::new(base_key.to_vec())))
    }

    /// Install a new generation whose transport key is derived from the
    /// session key of the connection.
    pub fn rekey_from_session(
        &self,
        session_key: &[u8],
        epoch: u32,
        cid: u32,
        start_time: u64,
    ) -> Result<u32, TransportError> {
        self.rekey_with(|key_number| {
            let info = ConnectionInfo { epoch, cid, start_time, key_number };
            derive_transport_base_key(self.enctype, session_key, &info)
        })
    }

    fn rekey_with<F>(&self, base_key_for: F) -> Result<u32, TransportError>
    where
        F: FnOnce(u32) -> Result<Zeroizing<Vec<u8>>, Krb5Error>,
    {
        let _guard = self.rekey_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let old = self.current();
        let Some(key_number) = old.key_number().checked_add(1) else {
            error!(key_number = old.key_number(), "key number space exhausted");
            return Err(TransportError::KeyNumberExhausted);
        };

        let next = base_key_for(key_number)
            .and_then(|base_key| {
                generate_transport_key(
                    self.enctype,
                    &base_key,
                    self.role,
                    key_number,
                    &self.policy,
                    self.env.now(),
                )
            })
            .map_err(|source| {
                error!(key_number, %source, "rekey failed");
                TransportError::Rekey { key_number, source }
            })?
            .with_retire_counter(Arc::clone(&self.retired));

        // Retain before swapping so lookups by key number never miss the old
        // generation
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_front(Arc::clone(&old));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        old.mark_superseded();
        let previous = old.key_number();
        drop(old);
        self.trim_retained();

        info!(key_number, previous, "installed new key generation");
        Ok(key_number)
    }

    /// Encrypt with the current generation and a fresh confounder.
    pub fn encrypt(
        &self,
        buf: &mut SegmentedBuffer,
        secure: Range<usize>,
        data: Range<usize>,
    ) -> Result<Sealed, TransportError> {
        let ctx = self.current();
        let mut confounder = vec![0u8; ctx.enctype().conf_len];
        self.env.random_bytes(&mut confounder);

        let len =
            ctx.encrypt(self.env.now(), buf, secure, data, Confounder::Random(&confounder))?;
        Ok(Sealed { wire_key_number: ctx.wire_key_number(), len })
    }

    /// Decrypt with the generation named by the packet header.
    pub fn decrypt(
        &self,
        wire_key_number: u16,
        buf: &mut SegmentedBuffer,
        offset: usize,
        len: usize,
    ) -> Result<(usize, usize), TransportError> {
        self.context_for(wire_key_number)?.decrypt(self.env.now(), buf, offset, len)
    }

    /// MIC with the current generation.
    pub fn get_mic(
        &self,
        metadata: &[u8],
        buf: &mut SegmentedBuffer,
        secure: Range<usize>,
        data: Range<usize>,
    ) -> Result<Sealed, TransportError> {
        let ctx = self.current();
        let len = ctx.get_mic(self.env.now(), metadata, buf, secure, data)?;
        Ok(Sealed { wire_key_number: ctx.wire_key_number(), len })
    }

    /// Verify a MIC with the generation named by the packet header.
    pub fn verify_mic(
        &self,
        wire_key_number: u16,
        metadata: &[u8],
        buf: &SegmentedBuffer,
        offset: usize,
        len: usize,
    ) -> Result<(usize, usize), TransportError> {
        self.context_for(wire_key_number)?.verify_mic(self.env.now(), metadata, buf, offset, len)
    }

    /// Release retained generations whose receive window has closed.
    ///
    /// Returns how many were released. A released generation retires once
    /// the last in-flight operation holding it finishes.
    pub fn prune(&self) -> usize {
        let now = self.env.now();
        let mut released = Vec::new();
        {
            let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
            retained.retain(|ctx| {
                if ctx.rx_window_closed(now) {
                    released.push(Arc::clone(ctx));
                    false
                } else {
                    true
                }
            });
        }

        let count = released.len();
        for ctx in released {
            debug!(key_number = ctx.key_number(), "releasing generation past receive window");
            self.drain(ctx);
        }
        self.draining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, weak)| weak.strong_count() > 0);
        count
    }

    /// Generations whose keys have been dropped so far.
    pub fn retired_count(&self) -> u64 {
        self.retired.load(Ordering::Acquire)
    }

    /// Lifecycle state of generation `key_number`, or `None` if it has not
    /// been created yet.
    pub fn generation_state(&self, key_number: u32) -> Option<KeyState> {
        let current = self.current();
        if key_number == current.key_number() {
            return Some(current.state(self.env.now()));
        }
        if key_number > current.key_number() {
            return None;
        }

        let retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        if retained.iter().any(|ctx| ctx.key_number() == key_number) {
            return Some(KeyState::Superseded);
        }
        drop(retained);

        let draining = self.draining.lock().unwrap_or_else(PoisonError::into_inner);
        let alive = draining
            .iter()
            .any(|(number, weak)| *number == key_number && weak.strong_count() > 0);
        Some(if alive { KeyState::Superseded } else { KeyState::Retired })
    }

    fn trim_retained(&self) {
        let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = self.policy.retained_generations.min(retained.len());
        let released = retained.split_off(keep);
        drop(retained);

        for ctx in released {
            self.drain(ctx);
        }
    }

    /// Stop holding `ctx`, remembering it only weakly until it retires.
    fn drain(&self, ctx: Generation<E>) {
        let key_number = ctx.key_number();
        let weak = Arc::downgrade(&ctx);
        drop(ctx);

        let mut draining = self.draining.lock().unwrap_or_else(PoisonError::into_inner);
        draining.retain(|(_, weak)| weak.strong_count() > 0);
        if weak.strong_count() > 0 {
            draining.push((key_number, weak));
        }
    }
}

#[cfg(test)]
mod tests {
    use rxgk_crypto::ENCTYPE_AES128_CTS_HMAC_SHA1_96;

    use super::*;
    use crate::SystemEnv;

    fn draining_len(manager: &ContextManager<SystemEnv>) -> usize {
        manager.draining.lock().unwrap().len()
    }

    /// INVARIANT: entries for retired generations are dropped on the next
    /// rekey even if `prune` is never called.
    #[test]
    fn rekey_forgets_retired_draining_entries() {
        let policy = RekeyPolicy { retained_generations: 0, ..RekeyPolicy::default() };
        let manager = ContextManager::new(
            SystemEnv::new(),
            Role::Client,
            ENCTYPE_AES128_CTS_HMAC_SHA1_96,
            &[0u8; 16],
            policy,
        )
        .unwrap();

        for n in 1..=10u8 {
            let in_flight = manager.current();
            manager.rekey(&[n; 16]).unwrap();
            assert_eq!(draining_len(&manager), 1);
            drop(in_flight);
        }
        assert_eq!(manager.retired_count(), 10);

        manager.rekey(&[0xFF; 16]).unwrap();
        assert_eq!(draining_len(&manager), 0);
        assert_eq!(manager.generation_state(10), Some(KeyState::Retired));
    }
}
