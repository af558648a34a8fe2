//! AES in CBC mode with ciphertext stealing (RFC 3962 §5)
//!
//! Kerberos CTS always swaps the final two blocks, including when the input
//! is an exact multiple of the block size. The initial vector is zero for
//! every message; the confounder provides the per-message randomness.

use aes::{
    Aes128, Aes256,
    cipher::{BlockDecrypt, BlockEncrypt, InvalidLength, KeyInit, generic_array::GenericArray},
};
use zeroize::Zeroize;

use crate::error::Krb5Error;

/// AES block length in bytes.
pub const AES_BLOCK_LEN: usize = 16;

/// Encryption primitive selected by an enctype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-128, CBC with ciphertext stealing
    Aes128Cts,
    /// AES-256, CBC with ciphertext stealing
    Aes256Cts,
}

impl CipherAlgorithm {
    /// Crypto name of the cipher mode.
    pub fn name(self) -> &'static str {
        "cts(cbc(aes))"
    }

    /// Raw key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128Cts => 16,
            Self::Aes256Cts => 32,
        }
    }

    /// Build a key schedule from raw key bytes.
    pub fn new_key(self, key: &[u8]) -> Result<EncryptionKey, Krb5Error> {
        let rejected = |_: InvalidLength| Krb5Error::InvalidKeyLength {
            expected: self.key_len(),
            actual: key.len(),
        };
        let schedule = match self {
            Self::Aes128Cts => Schedule::Aes128(Aes128::new_from_slice(key).map_err(rejected)?),
            Self::Aes256Cts => Schedule::Aes256(Aes256::new_from_slice(key).map_err(rejected)?),
        };
        Ok(EncryptionKey { algorithm: self, schedule })
    }
}

enum Schedule {
    Aes128(Aes128),
    Aes256(Aes256),
}

/// A scheduled encryption key (Ke).
///
/// The round keys are wiped when the key is dropped.
pub struct EncryptionKey {
    algorithm: CipherAlgorithm,
    schedule: Schedule,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey").field("algorithm", &self.algorithm).finish_non_exhaustive()
    }
}

impl EncryptionKey {
    /// Cipher this key belongs to.
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    /// Encrypt a single block in place (the basic `E()` of RFC 3961).
    pub(crate) fn encrypt_block(&self, block: &mut [u8; AES_BLOCK_LEN]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match &self.schedule {
            Schedule::Aes128(cipher) => cipher.encrypt_block(block),
            Schedule::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8; AES_BLOCK_LEN]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match &self.schedule {
            Schedule::Aes128(cipher) => cipher.decrypt_block(block),
            Schedule::Aes256(cipher) => cipher.decrypt_block(block),
        }
    }

    /// Encrypt `data` in place with a zero IV.
    ///
    /// Input must be at least one block long.
    pub fn cts_encrypt(&self, data: &mut [u8]) -> Result<(), Krb5Error> {
        let len = data.len();
        check_cts_len(len)?;

        let mut chain = [0u8; AES_BLOCK_LEN];
        let blocks = len.div_ceil(AES_BLOCK_LEN);
        let tail = len - (blocks - 1) * AES_BLOCK_LEN;

        // Plain CBC over everything but the final (possibly partial) block.
        // For a single block this loop is the whole job.
        let full = if blocks == 1 { 1 } else { blocks - 1 };
        for block in data[..full * AES_BLOCK_LEN].chunks_exact_mut(AES_BLOCK_LEN) {
            xor_into(&mut chain, block);
            self.encrypt_block(&mut chain);
            block.copy_from_slice(&chain);
        }
        if blocks == 1 {
            chain.zeroize();
            return Ok(());
        }

        // chain holds X = E(C[n-2] ^ P[n-1]). The last plaintext block is
        // zero padded, chained off X, then the two outputs are swapped.
        let penultimate = (blocks - 2) * AES_BLOCK_LEN;
        let mut last = [0u8; AES_BLOCK_LEN];
        last[..tail].copy_from_slice(&data[penultimate + AES_BLOCK_LEN..]);
        xor_into(&mut last, &chain);
        self.encrypt_block(&mut last);

        data[penultimate..penultimate + AES_BLOCK_LEN].copy_from_slice(&last);
        data[penultimate + AES_BLOCK_LEN..].copy_from_slice(&chain[..tail]);

        chain.zeroize();
        last.zeroize();
        Ok(())
    }

    /// Decrypt `data` in place with a zero IV.
    pub fn cts_decrypt(&self, data: &mut [u8]) -> Result<(), Krb5Error> {
        let len = data.len();
        check_cts_len(len)?;

        if len == AES_BLOCK_LEN {
            let mut block = [0u8; AES_BLOCK_LEN];
            block.copy_from_slice(data);
            self.decrypt_block(&mut block);
            data.copy_from_slice(&block);
            block.zeroize();
            return Ok(());
        }

        let blocks = len.div_ceil(AES_BLOCK_LEN);
        let tail = len - (blocks - 1) * AES_BLOCK_LEN;
        let penultimate = (blocks - 2) * AES_BLOCK_LEN;

        let mut prev = [0u8; AES_BLOCK_LEN];
        for block in data[..penultimate].chunks_exact_mut(AES_BLOCK_LEN) {
            let mut saved = [0u8; AES_BLOCK_LEN];
            saved.copy_from_slice(block);
            let mut plain = saved;
            self.decrypt_block(&mut plain);
            xor_into(&mut plain, &prev);
            block.copy_from_slice(&plain);
            prev = saved;
            plain.zeroize();
        }

        // D(swapped block) = X ^ P[n]', whose tail bytes are X's own because
        // P[n] was zero padded before encryption.
        let mut z = [0u8; AES_BLOCK_LEN];
        z.copy_from_slice(&data[penultimate..penultimate + AES_BLOCK_LEN]);
        self.decrypt_block(&mut z);

        let mut x = [0u8; AES_BLOCK_LEN];
        x[..tail].copy_from_slice(&data[penultimate + AES_BLOCK_LEN..]);
        x[tail..].copy_from_slice(&z[tail..]);

        let mut final_plain = [0u8; AES_BLOCK_LEN];
        for i in 0..tail {
            final_plain[i] = z[i] ^ x[i];
        }

        self.decrypt_block(&mut x);
        xor_into(&mut x, &prev);

        data[penultimate..penultimate + AES_BLOCK_LEN].copy_from_slice(&x);
        data[penultimate + AES_BLOCK_LEN..].copy_from_slice(&final_plain[..tail]);

        z.zeroize();
        x.zeroize();
        final_plain.zeroize();
        Ok(())
    }
}

fn check_cts_len(len: usize) -> Result<(), Krb5Error> {
    if len < AES_BLOCK_LEN {
        return Err(Krb5Error::Primitive {
            algorithm: "cts(cbc(aes))",
            reason: "input shorter than one block",
        });
    }
    Ok(())
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}
