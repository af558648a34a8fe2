//! Encryption and MICs over regions of a segmented buffer
//!
//! Encrypted layout within the secure region:
//!
//! ```text
//! ┌────────────┬───────────────┬─────┬──────────┐
//! │ confounder │   plaintext   │ pad │ checksum │
//! └────────────┴───────────────┴─────┴──────────┘
//!  ◄─────────── encrypted ───────────►
//! ```
//!
//! MIC layout: `checksum ‖ data`, where the checksum covers
//! `metadata ‖ data` and nothing is encrypted.
//!
//! Where the checksum sits relative to the cipher depends on the profile:
//! RFC 3961 checksums the plaintext, RFC 8009 checksums the zero IV and the
//! ciphertext. Either way a failed check leaves the caller's buffer exactly
//! as it arrived.

use std::ops::Range;

use zeroize::Zeroizing;

use crate::{
    buffer::SegmentedBuffer,
    checksum::ChecksumKey,
    cipher::AES_BLOCK_LEN,
    enctype::Enctype,
    error::Krb5Error,
    kdf::{EncKeyPair, KdfProfile},
};

/// Cipher state every message starts from.
const ZERO_IV: [u8; AES_BLOCK_LEN] = [0u8; AES_BLOCK_LEN];

/// Where the confounder for an encryption comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confounder<'a> {
    /// The caller already wrote `conf_len` bytes at the head of the secure
    /// region.
    Preconfounded,
    /// Fresh random bytes to write at the head of the secure region.
    Random(&'a [u8]),
}

/// Encrypt `data` in place and append the checksum.
///
/// `data` must start `conf_len` bytes into `secure`, and `secure` must be
/// large enough for [`Enctype::encrypted_len`]. Returns the number of bytes
/// written from the start of `secure`.
pub fn encrypt(
    enctype: &Enctype,
    keys: &EncKeyPair,
    buf: &mut SegmentedBuffer,
    secure: Range<usize>,
    data: Range<usize>,
    confounder: Confounder<'_>,
) -> Result<usize, Krb5Error> {
    check_data_placement(buf, &secure, &data, enctype.conf_len)?;
    let needed = enctype.encrypted_len(data.len());
    if needed > secure.len() {
        return Err(Krb5Error::BufferTooSmall { needed, available: secure.len() });
    }

    // Check the whole output region up front so nothing is written if it
    // spans too many fragments.
    buf.map_range(buf.span(secure.start, needed)?)?;

    let mut message = buf.gather(secure.start..data.end)?;
    if let Confounder::Random(bytes) = confounder {
        if bytes.len() != enctype.conf_len {
            return Err(Krb5Error::InvalidConfounder {
                expected: enctype.conf_len,
                actual: bytes.len(),
            });
        }
        message[..enctype.conf_len].copy_from_slice(bytes);
    }

    let pad = enctype.pad_len(message.len());
    let padded = message.len() + pad;
    message.resize(padded, pad as u8);

    let checksum = match enctype.profile {
        KdfProfile::Rfc3961Simplified => {
            let checksum = keys.checksum_key().checksum(&[message.as_slice()], enctype.cksum_len)?;
            keys.encryption_key().cts_encrypt(&mut message)?;
            checksum
        },
        KdfProfile::Rfc8009 => {
            keys.encryption_key().cts_encrypt(&mut message)?;
            keys.checksum_key().checksum(&[&ZERO_IV[..], message.as_slice()], enctype.cksum_len)?
        },
    };
    message.extend_from_slice(&checksum);

    buf.scatter(secure.start, &message)?;
    Ok(needed)
}

/// Verify and decrypt the region `offset..offset + len` in place.
///
/// Returns the offset and length of the recovered plaintext. On any error
/// the buffer is left untouched.
pub fn decrypt(
    enctype: &Enctype,
    keys: &EncKeyPair,
    buf: &mut SegmentedBuffer,
    offset: usize,
    len: usize,
) -> Result<(usize, usize), Krb5Error> {
    let min = enctype.min_ciphertext_len();
    if len < min {
        return Err(Krb5Error::MessageTooShort { len, min });
    }
    let body_len = len - enctype.cksum_len;
    if enctype.pad && body_len % enctype.block_len != 0 {
        return Err(Krb5Error::MisalignedCiphertext { len: body_len, block_len: enctype.block_len });
    }

    let mut message = buf.gather(buf.span(offset, len)?)?;
    let (body, checksum) = message.split_at_mut(body_len);

    match enctype.profile {
        KdfProfile::Rfc3961Simplified => {
            keys.encryption_key().cts_decrypt(body)?;
            keys.checksum_key().verify(&[&*body], checksum)?;
        },
        KdfProfile::Rfc8009 => {
            keys.checksum_key().verify(&[&ZERO_IV[..], &*body], checksum)?;
            keys.encryption_key().cts_decrypt(body)?;
        },
    }

    let mut plain_len = body_len - enctype.conf_len;
    if enctype.pad {
        plain_len -= strip_padding(enctype, &body[enctype.conf_len..])?;
    }

    buf.scatter(offset, body)?;
    Ok((offset + enctype.conf_len, plain_len))
}

/// Padding length from the tail of `plain`, after checking every pad byte.
fn strip_padding(enctype: &Enctype, plain: &[u8]) -> Result<usize, Krb5Error> {
    let pad = plain.last().map_or(0, |&b| usize::from(b));
    if pad == 0 || pad > enctype.block_len || pad > plain.len() {
        return Err(Krb5Error::InvalidPadding);
    }
    if plain[plain.len() - pad..].iter().any(|&b| usize::from(b) != pad) {
        return Err(Krb5Error::InvalidPadding);
    }
    Ok(pad)
}

/// Compute a MIC over `metadata ‖ data` and write it in the `cksum_len`
/// bytes just before `data`.
///
/// `data` must start `cksum_len` bytes into `secure`. Returns the length of
/// MIC plus data.
pub fn get_mic(
    enctype: &Enctype,
    key: &ChecksumKey,
    metadata: &[u8],
    buf: &mut SegmentedBuffer,
    secure: Range<usize>,
    data: Range<usize>,
) -> Result<usize, Krb5Error> {
    check_data_placement(buf, &secure, &data, enctype.cksum_len)?;
    buf.map_range(secure.start..data.end)?;

    let body = buf.gather(data.clone())?;
    let mic = key.checksum(&[metadata, body.as_slice()], enctype.cksum_len)?;
    buf.scatter(secure.start, &mic)?;
    Ok(enctype.cksum_len + data.len())
}

/// Check the MIC heading `offset..offset + len`.
///
/// Returns the offset and length of the protected data.
pub fn verify_mic(
    enctype: &Enctype,
    key: &ChecksumKey,
    metadata: &[u8],
    buf: &SegmentedBuffer,
    offset: usize,
    len: usize,
) -> Result<(usize, usize), Krb5Error> {
    if len < enctype.cksum_len {
        return Err(Krb5Error::MessageTooShort { len, min: enctype.cksum_len });
    }
    let region: Zeroizing<Vec<u8>> = buf.gather(buf.span(offset, len)?)?;
    let (mic, body) = region.split_at(enctype.cksum_len);
    key.verify(&[metadata, body], mic)?;
    Ok((offset + enctype.cksum_len, len - enctype.cksum_len))
}

fn check_data_placement(
    buf: &SegmentedBuffer,
    secure: &Range<usize>,
    data: &Range<usize>,
    header_len: usize,
) -> Result<(), Krb5Error> {
    let expected = buf.span(secure.start, header_len)?.end;
    if data.start != expected {
        return Err(Krb5Error::MisplacedData { expected, actual: data.start });
    }
    if data.end < data.start || data.end > secure.end {
        return Err(Krb5Error::BufferTooSmall {
            needed: data.end.saturating_sub(secure.start),
            available: secure.len(),
        });
    }
    Ok(())
}
