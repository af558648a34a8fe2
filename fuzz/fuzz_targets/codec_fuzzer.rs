//! Fuzz target for the segmented-buffer codec
//!
//! # Strategy
//!
//! - Arbitrary packet bytes split at arbitrary fragment boundaries
//! - Arbitrary offsets and lengths, including ones past the buffer end and
//!   ones whose sum wraps `usize`
//! - Every registered enctype
//! - Honest encryptions followed by single-bit corruption
//!
//! # Invariants
//!
//! - Decrypt and verify never panic on hostile input
//! - A failed decrypt leaves the buffer exactly as received
//! - A successful decrypt reports plaintext inside the region it was given
//! - Encrypt/decrypt roundtrip succeeds whenever encrypt succeeds
//! - Any corrupted bit fails the integrity check

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use rxgk_crypto::{
    decrypt, derive_checksum_key, derive_enc_keys, encrypt, registered_enctypes, verify_mic,
    Confounder, Enctype, Krb5Error, SegmentedBuffer,
};

#[derive(Debug, Arbitrary)]
struct CodecScenario {
    enctype: u8,
    key_fill: u8,
    usage: u32,
    fragments: Vec<Vec<u8>>,
    offset: usize,
    len: usize,
    honest: Option<Honest>,
}

#[derive(Debug, Arbitrary)]
struct Honest {
    plaintext: Vec<u8>,
    confounder: [u8; 16],
    fragment_len: u8,
    flip: Option<(u16, u8)>,
}

fn pick(selector: u8) -> &'static Enctype {
    let all: Vec<&'static Enctype> = registered_enctypes().collect();
    all[selector as usize % all.len()]
}

fn buffer(fragments: &[Vec<u8>]) -> SegmentedBuffer {
    let mut buf = SegmentedBuffer::new();
    for fragment in fragments {
        buf.push_fragment(BytesMut::from(fragment.as_slice()));
    }
    buf
}

fuzz_target!(|scenario: CodecScenario| {
    let enctype = pick(scenario.enctype);
    let base_key = vec![scenario.key_fill; enctype.key_bytes];
    let keys = derive_enc_keys(enctype, &base_key, scenario.usage).unwrap();
    let kc = derive_checksum_key(enctype, &base_key, scenario.usage).unwrap();

    // Hostile input
    let mut buf = buffer(&scenario.fragments);
    let before = buf.clone();
    let (offset, len) = (scenario.offset, scenario.len);
    match decrypt(enctype, &keys, &mut buf, offset, len) {
        Ok((plain_offset, plain_len)) => {
            assert!(plain_offset >= offset);
            assert!(plain_offset + plain_len <= buf.len());
        },
        Err(_) => assert_eq!(buf, before),
    }
    if let Ok((data_offset, data_len)) = verify_mic(enctype, &kc, &[], &buf, offset, len) {
        assert_eq!(data_offset + data_len, offset + len);
    }

    // Honest encryption, optionally corrupted
    let Some(honest) = scenario.honest else { return };
    let total = enctype.encrypted_len(honest.plaintext.len());
    let data = enctype.conf_len..enctype.conf_len + honest.plaintext.len();
    let mut bytes = vec![0u8; total];
    bytes[data.clone()].copy_from_slice(&honest.plaintext);
    let mut buf = SegmentedBuffer::chunked(&bytes, usize::from(honest.fragment_len));

    let conf = &honest.confounder[..enctype.conf_len];
    let written = match encrypt(enctype, &keys, &mut buf, 0..total, data, Confounder::Random(conf))
    {
        Ok(written) => written,
        Err(Krb5Error::TooManyFragments { .. }) => return,
        Err(err) => panic!("encrypt failed: {err}"),
    };

    if let Some((position, bit)) = honest.flip {
        let position = usize::from(position) % written;
        let mut byte = buf.gather(position..position + 1).unwrap();
        byte[0] ^= 1 << (bit % 8);
        buf.scatter(position, &byte).unwrap();
        assert_eq!(
            decrypt(enctype, &keys, &mut buf, 0, written),
            Err(Krb5Error::IntegrityCheckFailed)
        );
        return;
    }

    let (plain_offset, plain_len) = decrypt(enctype, &keys, &mut buf, 0, written).unwrap();
    let recovered = buf.gather(plain_offset..plain_offset + plain_len).unwrap();
    assert_eq!(recovered.as_slice(), honest.plaintext.as_slice());
});
