//! Tests for the key generation lifecycle.
//!
//! These tests verify:
//! - The byte threshold raises the rekey signal on the crossing send
//! - Packets tagged with a superseded key number still decrypt
//! - Released generations retire exactly once
//! - A failed rekey leaves the current generation in place

mod common;

use std::{sync::Arc, time::Duration};

use common::{ETYPE, base_key, connection, packet, receive, send, test_policy};
use rxgk_core::{
    ContextManager, Environment, KeyState, RXGK_SERVER_ENC_TOKEN, RekeyPolicy, Role,
    TransportError,
};
use rxgk_crypto::{
    Confounder, ConnectionInfo, Krb5Error, SegmentedBuffer, decrypt, derive_transport_base_key,
    encrypt, find_enctype, set_up_token_cipher,
};

/// INVARIANT: with a 1500 byte budget and a 1000 byte threshold, the second
/// 600 byte send flips the generation to `NeedsRekey`.
#[test]
fn second_send_crosses_threshold() {
    let (_env, client, _server) = connection(test_policy());

    send(&client, &[0u8; 600]);
    assert!(!client.rekey_pending());
    assert_eq!(client.generation_state(0), Some(KeyState::Active));
    assert_eq!(client.current().bytes_remaining(), 900);

    send(&client, &[0u8; 600]);
    assert!(client.rekey_pending());
    assert_eq!(client.generation_state(0), Some(KeyState::NeedsRekey));
    assert_eq!(client.current().bytes_remaining(), 300);
}

/// INVARIANT: after a rekey, a packet tagged with the old key number still
/// decrypts while new sends use the new key number.
#[test]
fn old_key_number_decrypts_after_rekey() {
    let (_env, client, server) = connection(test_policy());

    let (in_flight, old_wire, old_len) = send(&client, b"sent before rekey");
    assert_eq!(old_wire, 0);

    assert_eq!(server.rekey(&base_key(1)).unwrap(), 1);
    assert_eq!(client.rekey(&base_key(1)).unwrap(), 1);

    let (fresh, new_wire, new_len) = send(&client, b"sent after rekey");
    assert_eq!(new_wire, 1);

    assert_eq!(receive(&server, in_flight, old_wire, old_len), b"sent before rekey");
    assert_eq!(receive(&server, fresh, new_wire, new_len), b"sent after rekey");
    assert_eq!(server.generation_state(0), Some(KeyState::Superseded));
}

#[test]
fn unknown_key_number_is_dropped_silently() {
    let (_env, client, server) = connection(test_policy());
    let (mut buf, _, len) = send(&client, b"hello");

    let err = server.decrypt(9, &mut buf, 0, len).unwrap_err();
    assert_eq!(err, TransportError::UnknownKeyNumber { wire: 9 });
    assert!(err.should_drop_silently());
}

#[test]
fn tampered_packet_is_dropped_silently() {
    let (_env, client, server) = connection(test_policy());
    let (mut buf, wire, len) = send(&client, b"hello");

    let mut last = buf.gather(len - 1..len).unwrap();
    last[0] ^= 0x01;
    buf.scatter(len - 1, &last).unwrap();

    let err = server.decrypt(wire, &mut buf, 0, len).unwrap_err();
    assert_eq!(err, TransportError::Crypto(Krb5Error::IntegrityCheckFailed));
    assert!(err.should_drop_silently());
}

#[test]
fn mic_binds_to_generation() {
    let (_env, client, server) = connection(test_policy());
    let cksum_len = client.enctype().cksum_len;
    let mut bytes = vec![0u8; cksum_len];
    bytes.extend_from_slice(b"plain but authentic");
    let mut buf = SegmentedBuffer::contiguous(&bytes);

    let sealed =
        client.get_mic(b"header", &mut buf, 0..bytes.len(), cksum_len..bytes.len()).unwrap();
    server.rekey(&base_key(1)).unwrap();

    let (offset, len) =
        server.verify_mic(sealed.wire_key_number, b"header", &buf, 0, sealed.len).unwrap();
    assert_eq!(buf.gather(offset..offset + len).unwrap().as_slice(), b"plain but authentic");

    let err = server.verify_mic(1, b"header", &buf, 0, sealed.len).unwrap_err();
    assert_eq!(err, TransportError::Crypto(Krb5Error::IntegrityCheckFailed));
}

/// INVARIANT: generations beyond the retention limit retire exactly once
/// each when nothing else holds them.
#[test]
fn retention_limit_retires_oldest() {
    let (_env, client, _server) = connection(test_policy());

    for n in 1..=5u8 {
        client.rekey(&base_key(n)).unwrap();
    }

    assert_eq!(client.retired_count(), 3);
    assert_eq!(client.generation_state(0), Some(KeyState::Retired));
    assert_eq!(client.generation_state(2), Some(KeyState::Retired));
    assert_eq!(client.generation_state(3), Some(KeyState::Superseded));
    assert_eq!(client.generation_state(4), Some(KeyState::Superseded));
    assert_eq!(client.generation_state(5), Some(KeyState::Active));
    assert_eq!(client.generation_state(6), None);
}

/// INVARIANT: a reader holding a generation keeps it alive past release; the
/// generation retires when that reader lets go.
#[test]
fn in_flight_reader_delays_retirement() {
    let policy = RekeyPolicy { retained_generations: 0, ..test_policy() };
    let (env, client, server) = connection(policy);

    let held = client.current();
    client.rekey(&base_key(1)).unwrap();
    server.rekey(&base_key(1)).unwrap();

    assert_eq!(client.retired_count(), 0);
    assert_eq!(client.generation_state(0), Some(KeyState::Superseded));
    assert_eq!(held.state(env.now()), KeyState::Superseded);

    drop(held);
    assert_eq!(client.retired_count(), 1);
    assert_eq!(client.generation_state(0), Some(KeyState::Retired));
}

#[test]
fn prune_releases_generations_past_receive_window() {
    let (env, client, server) = connection(test_policy());

    env.advance(Duration::from_secs(10));
    client.rekey(&base_key(1)).unwrap();
    server.rekey(&base_key(1)).unwrap();

    // Generation 0 expired at 60s; its receive window closes at 65s
    env.advance(Duration::from_secs(54));
    assert_eq!(client.prune(), 0);

    env.advance(Duration::from_secs(1));
    assert_eq!(client.prune(), 1);
    assert_eq!(client.generation_state(0), Some(KeyState::Retired));
    assert_eq!(client.retired_count(), 1);

    // Generation 1 is still current and within its lifetime
    let (buf, wire, len) = send(&client, b"still going");
    assert_eq!(receive(&server, buf, wire, len), b"still going");
}

#[test]
fn failed_rekey_keeps_current_generation() {
    let (env, client, server) = connection(test_policy());

    let err = client.rekey(&[0u8; 5]).unwrap_err();
    assert_eq!(
        err,
        TransportError::Rekey {
            key_number: 1,
            source: Krb5Error::InvalidKeyLength { expected: 16, actual: 5 },
        }
    );
    assert!(err.is_fatal());
    assert_eq!(client.current().key_number(), 0);

    let (buf, wire, len) = send(&client, b"on the old key");
    assert_eq!(receive(&server, buf, wire, len), b"on the old key");

    // Past expiry the old generation refuses to send
    env.advance(Duration::from_secs(60));
    let (mut buf, secure, data) = packet(client.enctype(), b"too late");
    let err = client.encrypt(&mut buf, secure, data).unwrap_err();
    assert_eq!(err, TransportError::KeyExpired { key_number: 0 });
}

#[test]
fn expiry_approach_requests_rekey() {
    let (env, client, _server) = connection(test_policy());

    env.advance(Duration::from_secs(49));
    assert!(!client.rekey_pending());
    env.advance(Duration::from_secs(1));
    assert!(client.rekey_pending());

    client.rekey(&base_key(1)).unwrap();
    assert!(!client.rekey_pending());
}

#[test]
fn unbounded_key_lifetime_only_rekeys_on_bytes() {
    let policy = RekeyPolicy { key_lifetime: Duration::MAX, ..test_policy() };
    let (env, client, server) = connection(policy);
    assert_eq!(client.current().expiry(), None);

    env.advance(Duration::from_secs(365 * 24 * 3600));
    assert!(!client.rekey_pending());
    for _ in 0..2 {
        let (buf, wire, len) = send(&client, &[7u8; 600]);
        assert_eq!(receive(&server, buf, wire, len), vec![7u8; 600]);
    }
    assert!(client.rekey_pending());
    assert_eq!(client.prune(), 0);
}

#[test]
fn unknown_enctype_fails_setup() {
    let result = ContextManager::new(
        common::ManualEnv::new(),
        Role::Client,
        99,
        &base_key(0),
        test_policy(),
    );
    let Err(err) = result else { unreachable!("enctype 99 is not registered") };
    assert_eq!(err, TransportError::Crypto(Krb5Error::UnknownEnctype { etype: 99 }));
    assert!(err.is_fatal());
}

#[test]
fn session_key_rekey_agrees_between_peers() {
    let (_env, client, server) = connection(test_policy());
    let session_key = base_key(0x5E);

    client.rekey_from_session(&session_key, 0x1234, 0x40, 1_700_000_000).unwrap();
    server.rekey_from_session(&session_key, 0x1234, 0x40, 1_700_000_000).unwrap();

    let (buf, wire, len) = send(&server, b"derived from K0");
    assert_eq!(wire, 1);
    assert_eq!(receive(&client, buf, wire, len), b"derived from K0");

    // Same as deriving the transport key directly and rekeying with it
    let enctype = find_enctype(ETYPE).unwrap();
    let info =
        ConnectionInfo { epoch: 0x1234, cid: 0x40, start_time: 1_700_000_000, key_number: 2 };
    let transport_key = derive_transport_base_key(enctype, &session_key, &info).unwrap();
    server.rekey(&transport_key).unwrap();
    client.rekey_from_session(&session_key, 0x1234, 0x40, 1_700_000_000).unwrap();

    let (buf, wire, len) = send(&client, b"generation two");
    assert_eq!(receive(&server, buf, wire, len), b"generation two");
}

#[test]
fn token_cipher_round_trip() {
    let server_key = base_key(0x7A);
    let (keys, enctype) = set_up_token_cipher(ETYPE, &server_key, RXGK_SERVER_ENC_TOKEN).unwrap();

    let (mut buf, secure, data) = packet(enctype, b"opaque token");
    let len =
        encrypt(enctype, &keys, &mut buf, secure, data, Confounder::Random(&[3; 16])).unwrap();
    let (offset, plain) = decrypt(enctype, &keys, &mut buf, 0, len).unwrap();
    assert_eq!(buf.gather(offset..offset + plain).unwrap().as_slice(), b"opaque token");
}

#[test]
fn managers_are_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ContextManager<common::ManualEnv>>();
    assert_send_sync::<Arc<rxgk_core::TransportKeyContext<common::VirtualInstant>>>();
}
