//! RxGK Kerberos Crypto
//!
//! Kerberos 5 encryption types and the operations the RxGK transport needs
//! from them. Pure functions with deterministic outputs: no clock, no
//! logging, and callers provide confounder bytes for deterministic testing.
//!
//! # Key Lifecycle
//!
//! A GSS negotiation yields a session key K0. Each key generation of a
//! connection gets its own transport key, from which the per-direction
//! operational keys are derived.
//!
//! ```text
//! Session Key K0
//!        │
//!        ▼
//! PRF+(K0, epoch ‖ cid ‖ start_time ‖ key_number) → Transport Key
//!        │
//!        ▼
//! DK(transport key, usage ‖ purpose) → Ke, Ki, Kc
//!        │
//!        ▼
//! CTS Encryption + HMAC → Packet
//! ```
//!
//! # Security
//!
//! Integrity:
//! - Every decrypt and MIC check compares checksums in constant time
//! - A failed check leaves the packet bytes exactly as received
//! - Integrity failures carry no detail about where they failed
//!
//! Key hygiene:
//! - Key schedules and derived key bytes are zeroized on drop
//! - Scratch copies of plaintext are zeroized on drop
//! - Debug output of keys is redacted
//!
//! Negotiation:
//! - Unknown enctype ids and wrong key lengths fail setup; nothing falls back

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod buffer;
pub mod checksum;
pub mod cipher;
pub mod codec;
pub mod enctype;
pub mod error;
pub mod kdf;

pub use buffer::{MAX_FRAGMENTS, SegmentedBuffer};
pub use checksum::{ChecksumKey, HashAlgorithm};
pub use cipher::{AES_BLOCK_LEN, CipherAlgorithm, EncryptionKey};
pub use codec::{Confounder, decrypt, encrypt, get_mic, verify_mic};
pub use enctype::{
    ENCTYPE_AES128_CTS_HMAC_SHA1_96, ENCTYPE_AES128_CTS_HMAC_SHA256_128,
    ENCTYPE_AES256_CTS_HMAC_SHA1_96, ENCTYPE_AES256_CTS_HMAC_SHA384_192, Enctype, find_enctype,
    registered_enctypes, require_enctype,
};
pub use error::{ErrorClass, Krb5Error};
pub use kdf::{
    ConnectionInfo, EncKeyPair, KdfProfile, KeyPurpose, derive, derive_checksum_key,
    derive_enc_keys, derive_key, derive_transport_base_key, n_fold, prf, prf_plus,
    set_up_token_cipher, usage_constant,
};
