//! Keyed and unkeyed checksums

use hmac::{Hmac, Mac, digest::KeyInit};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::Krb5Error;

/// Hash primitive selected by an enctype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1 (RFC 3962 enctypes)
    Sha1,
    /// SHA-256 (RFC 8009, aes128)
    Sha256,
    /// SHA-384 (RFC 8009, aes256)
    Sha384,
}

impl HashAlgorithm {
    /// Crypto name of the bare hash.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
        }
    }

    /// Crypto name of the HMAC construction.
    pub fn hmac_name(self) -> &'static str {
        match self {
            Self::Sha1 => "hmac(sha1)",
            Self::Sha256 => "hmac(sha256)",
            Self::Sha384 => "hmac(sha384)",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }

    /// HMAC over the concatenation of `parts`.
    pub(crate) fn hmac(self, key: &[u8], parts: &[&[u8]]) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
        let algorithm = self.hmac_name();
        match self {
            Self::Sha1 => keyed::<Hmac<Sha1>>(algorithm, key, parts),
            Self::Sha256 => keyed::<Hmac<Sha256>>(algorithm, key, parts),
            Self::Sha384 => keyed::<Hmac<Sha384>>(algorithm, key, parts),
        }
    }

    /// Plain digest over the concatenation of `parts`.
    pub(crate) fn digest(self, parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        match self {
            Self::Sha1 => unkeyed::<Sha1>(parts),
            Self::Sha256 => unkeyed::<Sha256>(parts),
            Self::Sha384 => unkeyed::<Sha384>(parts),
        }
    }
}

fn keyed<M: Mac + KeyInit>(
    algorithm: &'static str,
    key: &[u8],
    parts: &[&[u8]],
) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| Krb5Error::Primitive { algorithm, reason: "key rejected" })?;
    for part in parts {
        Mac::update(&mut mac, part);
    }
    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}

fn unkeyed<D: Digest>(parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let mut hasher = D::new();
    for part in parts {
        Digest::update(&mut hasher, part);
    }
    Zeroizing::new(hasher.finalize().to_vec())
}

/// A checksum key (Kc or Ki), bound to its hash.
///
/// For enctypes without a keyed checksum the key bytes are ignored.
pub struct ChecksumKey {
    hash: HashAlgorithm,
    keyed: bool,
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for ChecksumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumKey")
            .field("hash", &self.hash)
            .field("keyed", &self.keyed)
            .finish_non_exhaustive()
    }
}

impl ChecksumKey {
    pub(crate) fn new(hash: HashAlgorithm, keyed: bool, key: Zeroizing<Vec<u8>>) -> Self {
        Self { hash, keyed, key }
    }

    /// Hash this key checksums with.
    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    /// Checksum over `parts`, truncated to `len` bytes.
    pub(crate) fn checksum(
        &self,
        parts: &[&[u8]],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, Krb5Error> {
        let mut full = if self.keyed {
            self.hash.hmac(&self.key, parts)?
        } else {
            self.hash.digest(parts)
        };
        if full.len() < len {
            return Err(Krb5Error::Primitive {
                algorithm: self.hash.hmac_name(),
                reason: "digest shorter than checksum",
            });
        }
        full.truncate(len);
        Ok(full)
    }

    /// Compare `expected` against a fresh checksum without early exit.
    pub(crate) fn verify(&self, parts: &[&[u8]], expected: &[u8]) -> Result<(), Krb5Error> {
        let computed = self.checksum(parts, expected.len())?;
        if bool::from(computed.as_slice().ct_eq(expected)) {
            Ok(())
        } else {
            Err(Krb5Error::IntegrityCheckFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hash: HashAlgorithm) -> ChecksumKey {
        ChecksumKey::new(hash, true, Zeroizing::new(vec![0x0B; 20]))
    }

    #[test]
    fn hmac_sha256_rfc4231_case_1() {
        let mac = HashAlgorithm::Sha256.hmac(&[0x0B; 20], &[b"Hi There"]).unwrap();
        assert_eq!(
            hex::encode(mac.as_slice()),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn parts_are_concatenated() {
        let whole = HashAlgorithm::Sha1.hmac(b"key", &[b"hello world"]).unwrap();
        let split = HashAlgorithm::Sha1.hmac(b"key", &[b"hello", b" ", b"world"]).unwrap();
        assert_eq!(whole, split);
    }

    #[test]
    fn checksum_truncates() {
        for hash in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha384] {
            let sum = key(hash).checksum(&[b"data"], 12).unwrap();
            assert_eq!(sum.len(), 12);
        }
    }

    #[test]
    fn checksum_longer_than_digest_rejected() {
        let result = key(HashAlgorithm::Sha1).checksum(&[b"data"], 21);
        assert!(matches!(result, Err(Krb5Error::Primitive { .. })));
    }

    #[test]
    fn verify_detects_single_bit_flip() {
        let key = key(HashAlgorithm::Sha256);
        let mut sum = key.checksum(&[b"payload"], 16).unwrap();
        assert!(key.verify(&[b"payload"], &sum).is_ok());

        sum[7] ^= 0x01;
        assert_eq!(key.verify(&[b"payload"], &sum), Err(Krb5Error::IntegrityCheckFailed));
    }

    #[test]
    fn unkeyed_checksum_ignores_key() {
        let a = ChecksumKey::new(HashAlgorithm::Sha1, false, Zeroizing::new(vec![1; 16]));
        let b = ChecksumKey::new(HashAlgorithm::Sha1, false, Zeroizing::new(vec![2; 16]));
        assert_eq!(a.checksum(&[b"x"], 20).unwrap(), b.checksum(&[b"x"], 20).unwrap());
    }
}
