//! Key derivation (RFC 3961 §5, RFC 8009 §3)
//!
//! Every operational key is `DK(base_key, usage ‖ purpose)`. How `DK` turns
//! the constant into key material depends on the enctype's [`KdfProfile`]:
//!
//! ```text
//! RFC 3961 simplified:  n-fold(constant) ──E──> K1 ──E──> K2 ...  (DR)
//! RFC 8009:             HMAC(key, i ‖ label ‖ 0x00 ‖ context ‖ bits)
//!                                │
//!                                ▼
//!                     truncate ─> random-to-key ─> key
//! ```

use zeroize::Zeroizing;

use crate::{
    checksum::ChecksumKey,
    cipher::{AES_BLOCK_LEN, EncryptionKey},
    enctype::{Enctype, require_enctype},
    error::Krb5Error,
};

/// Constant used to derive the PRF key and label the RFC 8009 PRF.
const PRF_CONSTANT: &[u8] = b"prf";

/// Key derivation and message layout variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfProfile {
    /// RFC 3961 simplified profile: DR by iterated block encryption,
    /// checksum over the plaintext.
    Rfc3961Simplified,
    /// RFC 8009: SP800-108 HMAC counter KDF, checksum over IV and
    /// ciphertext.
    Rfc8009,
}

impl KdfProfile {
    /// Convert pseudo-random bytes into a key. Both AES profiles use the
    /// identity function.
    pub fn random_to_key(
        self,
        enctype: &Enctype,
        random: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
        if random.len() != enctype.key_bytes {
            return Err(Krb5Error::InvalidKeyLength {
                expected: enctype.key_bytes,
                actual: random.len(),
            });
        }
        match self {
            Self::Rfc3961Simplified | Self::Rfc8009 => {
                Ok(Zeroizing::new(random[..enctype.key_len].to_vec()))
            },
        }
    }
}

/// Which of the three derived keys a usage constant selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Kc, for detached MICs
    Checksum,
    /// Ke, for encryption
    Encryption,
    /// Ki, for the checksum inside encrypted messages
    Integrity,
}

impl KeyPurpose {
    /// Trailing byte of the usage constant.
    pub fn constant_byte(self) -> u8 {
        match self {
            Self::Checksum => 0x99,
            Self::Encryption => 0xAA,
            Self::Integrity => 0x55,
        }
    }

    /// Length of the key this purpose yields for `enctype`.
    pub fn key_len(self, enctype: &Enctype) -> usize {
        match self {
            Self::Checksum => enctype.kc_len,
            Self::Encryption => enctype.ke_len,
            Self::Integrity => enctype.ki_len,
        }
    }
}

/// Build the five-byte usage constant: `usage` big-endian then the purpose
/// byte.
pub fn usage_constant(usage: u32, purpose: KeyPurpose) -> [u8; 5] {
    let mut constant = [0u8; 5];
    constant[..4].copy_from_slice(&usage.to_be_bytes());
    constant[4] = purpose.constant_byte();
    constant
}

/// n-fold `input` into `out_len` bytes (RFC 3961 §5.1).
///
/// The input is replicated with successive 13-bit right rotations out to the
/// least common multiple of both lengths, then the `out_len`-byte chunks are
/// added with end-around carry. Empty input folds to zeros.
pub fn n_fold(input: &[u8], out_len: usize) -> Vec<u8> {
    let in_len = input.len();
    let mut out = vec![0u8; out_len];
    if in_len == 0 || out_len == 0 {
        return out;
    }

    let lcm = out_len / gcd(out_len, in_len) * in_len;
    let in_bits = in_len * 8;
    let mut carry: u32 = 0;

    for i in (0..lcm).rev() {
        // Most significant bit of output byte i, located in the rotated copy.
        let msbit = ((in_bits - 1) + (in_bits + 13) * (i / in_len) + ((in_len - i % in_len) << 3))
            % in_bits;
        let hi = u32::from(input[((in_len - 1) - (msbit >> 3)) % in_len]);
        let lo = u32::from(input[(in_len - (msbit >> 3)) % in_len]);
        carry += (((hi << 8) | lo) >> ((msbit & 7) + 1)) & 0xff;
        carry += u32::from(out[i % out_len]);
        out[i % out_len] = (carry & 0xff) as u8;
        carry >>= 8;
    }

    if carry != 0 {
        for byte in out.iter_mut().rev() {
            carry += u32::from(*byte);
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
    }
    out
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn check_base_key(enctype: &Enctype, base_key: &[u8]) -> Result<(), Krb5Error> {
    if base_key.len() != enctype.key_bytes {
        return Err(Krb5Error::InvalidKeyLength {
            expected: enctype.key_bytes,
            actual: base_key.len(),
        });
    }
    Ok(())
}

/// `DR(key, constant)` of RFC 3961: encrypt the n-folded constant, then keep
/// encrypting the previous output until `out_len` bytes exist.
fn derive_random_3961(
    enctype: &Enctype,
    base_key: &[u8],
    constant: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    let key = enctype.cipher.new_key(base_key)?;
    let mut block = [0u8; AES_BLOCK_LEN];
    block.copy_from_slice(&n_fold(constant, AES_BLOCK_LEN));

    let mut out = Zeroizing::new(Vec::with_capacity(out_len + AES_BLOCK_LEN));
    while out.len() < out_len {
        key.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }
    out.truncate(out_len);
    Ok(out)
}

/// `KDF-HMAC-SHA2(key, label, context, k)` of RFC 8009 §3, SP800-108 counter
/// mode with a 32-bit counter and the output length in bits.
fn kdf_hmac_sha2(
    enctype: &Enctype,
    key: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    let bits = u32::try_from(out_len * 8).map_err(|_| Krb5Error::Primitive {
        algorithm: enctype.hash.hmac_name(),
        reason: "requested output too long",
    })?;
    let bits = bits.to_be_bytes();

    let mut out = Zeroizing::new(Vec::with_capacity(out_len + enctype.hash_len));
    let mut counter: u32 = 1;
    while out.len() < out_len {
        let block =
            enctype.hash.hmac(key, &[&counter.to_be_bytes(), label, &[0x00], context, &bits])?;
        out.extend_from_slice(&block);
        counter += 1;
    }
    out.truncate(out_len);
    Ok(out)
}

/// `DK(base_key, constant)`: derive a full-length key for `enctype`.
pub fn derive_key(
    enctype: &Enctype,
    base_key: &[u8],
    constant: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    check_base_key(enctype, base_key)?;
    let random = match enctype.profile {
        KdfProfile::Rfc3961Simplified => {
            derive_random_3961(enctype, base_key, constant, enctype.key_bytes)?
        },
        KdfProfile::Rfc8009 => kdf_hmac_sha2(enctype, base_key, constant, &[], enctype.key_bytes)?,
    };
    enctype.random_to_key(&random)
}

/// Derive the key for `usage` and `purpose` from `base_key`.
///
/// The RFC 8009 checksum keys are HMAC keys of their own length and skip
/// `random_to_key`; every other derived key is a full cipher key.
pub fn derive(
    enctype: &Enctype,
    base_key: &[u8],
    usage: u32,
    purpose: KeyPurpose,
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    let constant = usage_constant(usage, purpose);
    match (enctype.profile, purpose) {
        (KdfProfile::Rfc8009, KeyPurpose::Checksum | KeyPurpose::Integrity) => {
            check_base_key(enctype, base_key)?;
            kdf_hmac_sha2(enctype, base_key, &constant, &[], purpose.key_len(enctype))
        },
        _ => derive_key(enctype, base_key, &constant),
    }
}

/// An encryption key and the checksum key that authenticates it.
///
/// These always come as a pair, as per RFC 3961 `encrypt()`.
#[derive(Debug)]
pub struct EncKeyPair {
    ke: EncryptionKey,
    ki: ChecksumKey,
}

impl EncKeyPair {
    /// Encryption key (Ke).
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.ke
    }

    /// Integrity key (Ki).
    pub fn checksum_key(&self) -> &ChecksumKey {
        &self.ki
    }
}

/// Derive the Ke/Ki pair for `usage`.
pub fn derive_enc_keys(
    enctype: &Enctype,
    base_key: &[u8],
    usage: u32,
) -> Result<EncKeyPair, Krb5Error> {
    let ke = derive(enctype, base_key, usage, KeyPurpose::Encryption)?;
    let ki = derive(enctype, base_key, usage, KeyPurpose::Integrity)?;
    Ok(EncKeyPair {
        ke: enctype.cipher.new_key(&ke)?,
        ki: ChecksumKey::new(enctype.hash, enctype.keyed_cksum, ki),
    })
}

/// Derive the detached-MIC key (Kc) for `usage`.
pub fn derive_checksum_key(
    enctype: &Enctype,
    base_key: &[u8],
    usage: u32,
) -> Result<ChecksumKey, Krb5Error> {
    let kc = derive(enctype, base_key, usage, KeyPurpose::Checksum)?;
    Ok(ChecksumKey::new(enctype.hash, enctype.keyed_cksum, kc))
}

/// Build the key pair that opens a token blob, before any transport key
/// exists.
pub fn set_up_token_cipher(
    etype: u32,
    raw_key: &[u8],
    usage: u32,
) -> Result<(EncKeyPair, &'static Enctype), Krb5Error> {
    let enctype = require_enctype(etype)?;
    let keys = derive_enc_keys(enctype, raw_key, usage)?;
    Ok((keys, enctype))
}

/// Pseudo-random function of the enctype (RFC 3962 §6, RFC 8009 §5).
///
/// Yields `prf_len` bytes.
pub fn prf(
    enctype: &Enctype,
    key: &[u8],
    input: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    match enctype.profile {
        KdfProfile::Rfc3961Simplified => {
            let prf_key = derive_key(enctype, key, PRF_CONSTANT)?;
            let mut data = enctype.hash.digest(&[input]);
            let whole_blocks = data.len() / enctype.block_len * enctype.block_len;
            data.truncate(whole_blocks);
            enctype.cipher.new_key(&prf_key)?.cts_encrypt(&mut data)?;
            data.truncate(enctype.prf_len);
            Ok(data)
        },
        KdfProfile::Rfc8009 => {
            check_base_key(enctype, key)?;
            kdf_hmac_sha2(enctype, key, PRF_CONSTANT, input, enctype.prf_len)
        },
    }
}

/// `PRF+(key, seed)` of RFC 6113 §5.1, truncated to `out_len` bytes.
pub fn prf_plus(
    enctype: &Enctype,
    key: &[u8],
    seed: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    let mut input = Zeroizing::new(Vec::with_capacity(seed.len() + 1));
    input.push(0);
    input.extend_from_slice(seed);

    let mut out = Zeroizing::new(Vec::with_capacity(out_len + enctype.prf_len));
    let mut counter: u8 = 1;
    while out.len() < out_len {
        input[0] = counter;
        out.extend_from_slice(&prf(enctype, key, &input)?);
        counter = counter.checked_add(1).ok_or(Krb5Error::Primitive {
            algorithm: "prf+",
            reason: "output length exceeds 255 PRF blocks",
        })?;
    }
    out.truncate(out_len);
    Ok(out)
}

/// Connection parameters that make each transport key unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection epoch
    pub epoch: u32,
    /// Connection id
    pub cid: u32,
    /// Time the connection was started
    pub start_time: u64,
    /// Key generation the transport key is for
    pub key_number: u32,
}

impl ConnectionInfo {
    /// Big-endian encoding used as the PRF+ seed.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[0..4].copy_from_slice(&self.epoch.to_be_bytes());
        out[4..8].copy_from_slice(&self.cid.to_be_bytes());
        out[8..16].copy_from_slice(&self.start_time.to_be_bytes());
        out[16..20].copy_from_slice(&self.key_number.to_be_bytes());
        out
    }
}

/// Derive the transport key for one key generation from the session key K0:
/// `random-to-key(PRF+(K0, key_bytes, conn_info))`.
pub fn derive_transport_base_key(
    enctype: &Enctype,
    session_key: &[u8],
    info: &ConnectionInfo,
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    let random = prf_plus(enctype, session_key, &info.to_bytes(), enctype.key_bytes)?;
    enctype.random_to_key(&random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enctype::{
        ENCTYPE_AES128_CTS_HMAC_SHA256_128, ENCTYPE_AES256_CTS_HMAC_SHA1_96, find_enctype,
        registered_enctypes,
    };

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn n_fold_rfc3961_vectors() {
        assert_eq!(n_fold(b"012345", 8), unhex("be072631276b1955"));
        assert_eq!(n_fold(b"password", 7), unhex("78a07b6caf85fa"));
        assert_eq!(n_fold(b"kerberos", 8), unhex("6b65726265726f73"));
        assert_eq!(n_fold(b"kerberos", 16), unhex("6b65726265726f737b9b5b2b93132b93"));
    }

    #[test]
    fn n_fold_empty_input() {
        assert_eq!(n_fold(b"", 16), vec![0u8; 16]);
    }

    #[test]
    fn rfc8009_aes128_key_derivation() {
        let enctype = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA256_128).unwrap();
        let base = unhex("3705d96080c17728a0e800eab6e0d23c");

        let kc = derive(enctype, &base, 2, KeyPurpose::Checksum).unwrap();
        let ke = derive(enctype, &base, 2, KeyPurpose::Encryption).unwrap();
        let ki = derive(enctype, &base, 2, KeyPurpose::Integrity).unwrap();

        assert_eq!(kc.as_slice(), unhex("b31a018a48f54776f403e9a396325dc3"));
        assert_eq!(ke.as_slice(), unhex("9b197dd1e8c5609d6e67c3e37c62c72e"));
        assert_eq!(ki.as_slice(), unhex("9fda0e56ab2d85e1569a688696c26a6c"));
    }

    #[test]
    fn derived_lengths_match_descriptor() {
        for enctype in registered_enctypes() {
            let base = vec![0x5A; enctype.key_bytes];
            for purpose in [KeyPurpose::Checksum, KeyPurpose::Encryption, KeyPurpose::Integrity] {
                let key = derive(enctype, &base, 1026, purpose).unwrap();
                assert_eq!(key.len(), purpose.key_len(enctype), "{} {purpose:?}", enctype.name);
            }
            let dk = derive_key(enctype, &base, b"anything").unwrap();
            assert_eq!(dk.len(), enctype.key_len, "{}", enctype.name);
        }
    }

    #[test]
    fn purposes_and_usages_separate_keys() {
        let enctype = find_enctype(ENCTYPE_AES256_CTS_HMAC_SHA1_96).unwrap();
        let base = [0x11; 32];

        let ke = derive(enctype, &base, 1026, KeyPurpose::Encryption).unwrap();
        let ki = derive(enctype, &base, 1026, KeyPurpose::Integrity).unwrap();
        let ke_other = derive(enctype, &base, 1028, KeyPurpose::Encryption).unwrap();

        assert_ne!(ke, ki);
        assert_ne!(ke, ke_other);
    }

    #[test]
    fn short_base_key_rejected() {
        for enctype in registered_enctypes() {
            let base = vec![0u8; enctype.key_bytes - 1];
            let result = derive(enctype, &base, 1, KeyPurpose::Encryption);
            assert_eq!(
                result.map(|_| ()),
                Err(Krb5Error::InvalidKeyLength {
                    expected: enctype.key_bytes,
                    actual: enctype.key_bytes - 1
                })
            );
        }
    }

    #[test]
    fn random_to_key_requires_key_bytes() {
        for enctype in registered_enctypes() {
            let key = enctype.random_to_key(&vec![7u8; enctype.key_bytes]).unwrap();
            assert_eq!(key.len(), enctype.key_len);
            assert!(enctype.random_to_key(&[7u8; 3]).is_err());
        }
    }

    #[test]
    fn usage_constant_layout() {
        assert_eq!(usage_constant(0x0102_0304, KeyPurpose::Encryption), [1, 2, 3, 4, 0xAA]);
        assert_eq!(usage_constant(2, KeyPurpose::Checksum), [0, 0, 0, 2, 0x99]);
        assert_eq!(usage_constant(2, KeyPurpose::Integrity), [0, 0, 0, 2, 0x55]);
    }

    #[test]
    fn prf_output_length_and_determinism() {
        for enctype in registered_enctypes() {
            let key = vec![0x33; enctype.key_bytes];
            let a = prf(enctype, &key, b"test").unwrap();
            let b = prf(enctype, &key, b"test").unwrap();
            let c = prf(enctype, &key, b"tesu").unwrap();
            assert_eq!(a.len(), enctype.prf_len, "{}", enctype.name);
            assert_eq!(a, b);
            assert_ne!(a, c);
        }
    }

    #[test]
    fn prf_plus_extends_past_one_block() {
        for enctype in registered_enctypes() {
            let key = vec![0x44; enctype.key_bytes];
            let long = prf_plus(enctype, &key, b"seed", enctype.prf_len * 2 + 3).unwrap();
            let short = prf_plus(enctype, &key, b"seed", enctype.prf_len).unwrap();
            assert_eq!(long.len(), enctype.prf_len * 2 + 3);
            assert_eq!(&long[..enctype.prf_len], short.as_slice());
        }
    }

    #[test]
    fn transport_keys_differ_per_key_number() {
        let enctype = find_enctype(ENCTYPE_AES128_CTS_HMAC_SHA256_128).unwrap();
        let k0 = [0x99; 16];
        let info = ConnectionInfo { epoch: 1, cid: 4, start_time: 77, key_number: 0 };

        let tk0 = derive_transport_base_key(enctype, &k0, &info).unwrap();
        let tk1 =
            derive_transport_base_key(enctype, &k0, &ConnectionInfo { key_number: 1, ..info })
                .unwrap();

        assert_eq!(tk0.len(), enctype.key_len);
        assert_ne!(tk0, tk1);
    }

    #[test]
    fn token_cipher_requires_known_enctype() {
        let result = set_up_token_cipher(99, &[0u8; 16], 1036);
        assert!(matches!(result, Err(Krb5Error::UnknownEnctype { etype: 99 })));

        let (_, enctype) = set_up_token_cipher(17, &[0u8; 16], 1036).unwrap();
        assert_eq!(enctype.etype, 17);
    }
}
