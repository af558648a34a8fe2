//! Enctype registry
//!
//! Each [`Enctype`] fixes the lengths and primitives of one Kerberos
//! encryption type. The table is static and read-only; lookups never fall
//! back to a default, since an unknown id means negotiation failed.

use crate::{
    cipher::{AES_BLOCK_LEN, CipherAlgorithm},
    checksum::HashAlgorithm,
    error::Krb5Error,
    kdf::KdfProfile,
};

/// `aes128-cts-hmac-sha1-96` (RFC 3962)
pub const ENCTYPE_AES128_CTS_HMAC_SHA1_96: u32 = 17;
/// `aes256-cts-hmac-sha1-96` (RFC 3962)
pub const ENCTYPE_AES256_CTS_HMAC_SHA1_96: u32 = 18;
/// `aes128-cts-hmac-sha256-128` (RFC 8009)
pub const ENCTYPE_AES128_CTS_HMAC_SHA256_128: u32 = 19;
/// `aes256-cts-hmac-sha384-192` (RFC 8009)
pub const ENCTYPE_AES256_CTS_HMAC_SHA384_192: u32 = 20;

/// Kerberos encryption type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enctype {
    /// Encryption (key) type
    pub etype: u32,
    /// Checksum type
    pub ctype: u32,
    /// Friendly name
    pub name: &'static str,
    /// Crypto encrypt name
    pub encrypt_name: &'static str,
    /// Crypto checksum name
    pub cksum_name: &'static str,
    /// Crypto hash name
    pub hash_name: &'static str,
    /// Length of an encryption block
    pub block_len: usize,
    /// Length of the confounder (normally `block_len`)
    pub conf_len: usize,
    /// Length of the checksum
    pub cksum_len: usize,
    /// Length of the raw key
    pub key_bytes: usize,
    /// Length of the final key
    pub key_len: usize,
    /// Length of the hash
    pub hash_len: usize,
    /// Length of a PRF result
    pub prf_len: usize,
    /// Length of Kc
    pub kc_len: usize,
    /// Length of Ke
    pub ke_len: usize,
    /// Length of Ki
    pub ki_len: usize,
    /// True if the checksum is keyed
    pub keyed_cksum: bool,
    /// True if plaintext is padded to a block boundary
    pub pad: bool,
    /// Block cipher
    pub cipher: CipherAlgorithm,
    /// Hash under the checksum and KDF
    pub hash: HashAlgorithm,
    /// Key derivation and message layout profile
    pub profile: KdfProfile,
}

impl Enctype {
    /// Shortest region `decrypt` will accept.
    pub fn min_ciphertext_len(&self) -> usize {
        self.conf_len + self.cksum_len
    }

    /// Bytes `encrypt` writes for `data_len` bytes of plaintext.
    pub fn encrypted_len(&self, data_len: usize) -> usize {
        let body = self.conf_len.saturating_add(data_len);
        body.saturating_add(self.pad_len(body)).saturating_add(self.cksum_len)
    }

    /// Padding appended after `len` bytes of confounder and plaintext.
    ///
    /// Padding is always one to `block_len` bytes, each holding the pad
    /// length, so it can be stripped unambiguously after decryption.
    pub fn pad_len(&self, len: usize) -> usize {
        if self.pad { self.block_len - len % self.block_len } else { 0 }
    }

    /// Convert pseudo-random output into a key for this enctype.
    pub fn random_to_key(&self, random: &[u8]) -> Result<zeroize::Zeroizing<Vec<u8>>, Krb5Error> {
        self.profile.random_to_key(self, random)
    }
}

const AES_SHA1_TEMPLATE: Enctype = Enctype {
    etype: ENCTYPE_AES128_CTS_HMAC_SHA1_96,
    ctype: 15,
    name: "aes128-cts-hmac-sha1-96",
    encrypt_name: "cts(cbc(aes))",
    cksum_name: "hmac(sha1)",
    hash_name: "sha1",
    block_len: AES_BLOCK_LEN,
    conf_len: AES_BLOCK_LEN,
    cksum_len: 12,
    key_bytes: 16,
    key_len: 16,
    hash_len: 20,
    prf_len: 16,
    kc_len: 16,
    ke_len: 16,
    ki_len: 16,
    keyed_cksum: true,
    pad: false,
    cipher: CipherAlgorithm::Aes128Cts,
    hash: HashAlgorithm::Sha1,
    profile: KdfProfile::Rfc3961Simplified,
};

static ENCTYPES: [Enctype; 4] = [
    AES_SHA1_TEMPLATE,
    Enctype {
        etype: ENCTYPE_AES256_CTS_HMAC_SHA1_96,
        ctype: 16,
        name: "aes256-cts-hmac-sha1-96",
        key_bytes: 32,
        key_len: 32,
        kc_len: 32,
        ke_len: 32,
        ki_len: 32,
        cipher: CipherAlgorithm::Aes256Cts,
        ..AES_SHA1_TEMPLATE
    },
    Enctype {
        etype: ENCTYPE_AES128_CTS_HMAC_SHA256_128,
        ctype: 19,
        name: "aes128-cts-hmac-sha256-128",
        encrypt_name: "cts(cbc(aes))",
        cksum_name: "hmac(sha256)",
        hash_name: "sha256",
        block_len: AES_BLOCK_LEN,
        conf_len: AES_BLOCK_LEN,
        cksum_len: 16,
        key_bytes: 16,
        key_len: 16,
        hash_len: 32,
        prf_len: 32,
        kc_len: 16,
        ke_len: 16,
        ki_len: 16,
        keyed_cksum: true,
        pad: false,
        cipher: CipherAlgorithm::Aes128Cts,
        hash: HashAlgorithm::Sha256,
        profile: KdfProfile::Rfc8009,
    },
    Enctype {
        etype: ENCTYPE_AES256_CTS_HMAC_SHA384_192,
        ctype: 20,
        name: "aes256-cts-hmac-sha384-192",
        encrypt_name: "cts(cbc(aes))",
        cksum_name: "hmac(sha384)",
        hash_name: "sha384",
        block_len: AES_BLOCK_LEN,
        conf_len: AES_BLOCK_LEN,
        cksum_len: 24,
        key_bytes: 32,
        key_len: 32,
        hash_len: 48,
        prf_len: 48,
        kc_len: 24,
        ke_len: 32,
        ki_len: 24,
        keyed_cksum: true,
        pad: false,
        cipher: CipherAlgorithm::Aes256Cts,
        hash: HashAlgorithm::Sha384,
        profile: KdfProfile::Rfc8009,
    },
];

/// Look up an enctype by id.
pub fn find_enctype(etype: u32) -> Option<&'static Enctype> {
    ENCTYPES.iter().find(|e| e.etype == etype)
}

/// Look up an enctype by id, treating absence as a negotiation error.
pub fn require_enctype(etype: u32) -> Result<&'static Enctype, Krb5Error> {
    find_enctype(etype).ok_or(Krb5Error::UnknownEnctype { etype })
}

/// All registered enctypes.
pub fn registered_enctypes() -> impl Iterator<Item = &'static Enctype> {
    ENCTYPES.iter()
}
