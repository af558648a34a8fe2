//! Error types for the RxGK transport core.
//!
//! Crypto failures are wrapped unchanged so the transport can still classify
//! them; lifecycle failures (expiry, unknown generations, failed rekeys) get
//! their own variants.

use rxgk_crypto::{ErrorClass, Krb5Error};
use thiserror::Error;

/// Errors from key generations and the context manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Codec or key derivation failure
    #[error(transparent)]
    Crypto(#[from] Krb5Error),

    /// Generation is past its expiry or byte budget and refuses the operation
    #[error("key generation {key_number} has expired")]
    KeyExpired {
        /// Generation that refused
        key_number: u32,
    },

    /// No retained generation matches the key number from a packet header
    #[error("no key generation for wire key number {wire}")]
    UnknownKeyNumber {
        /// Key number as carried on the wire
        wire: u16,
    },

    /// Key numbers cannot increase any further
    #[error("key number space exhausted")]
    KeyNumberExhausted,

    /// Deriving the next generation failed; the current one stays installed
    #[error("rekey to generation {key_number} failed: {source}")]
    Rekey {
        /// Generation that could not be derived
        key_number: u32,
        /// Underlying derivation failure
        source: Krb5Error,
    },
}

impl TransportError {
    /// Returns true if the connection must be torn down.
    ///
    /// Negotiation and primitive failures mean the key material is unusable.
    /// An expired generation is not fatal by itself: a successful rekey
    /// recovers.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Crypto(err) => err.is_fatal(),
            Self::KeyNumberExhausted | Self::Rekey { .. } => true,
            Self::KeyExpired { .. } | Self::UnknownKeyNumber { .. } => false,
        }
    }

    /// Returns true if the packet should be discarded without any response
    /// or detail reaching the peer.
    pub fn should_drop_silently(&self) -> bool {
        match self {
            Self::Crypto(err) => err.class() == ErrorClass::Integrity,
            Self::UnknownKeyNumber { .. } => true,
            _ => false,
        }
    }
}
