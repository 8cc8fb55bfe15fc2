#![allow(clippy::unwrap_used, clippy::expect_used)]
mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use common::{Peer, pump_until, secure_pair};
use rustyzrtp::protocol::{MessageCode, MessageSeverity, ProtocolState};
use rustyzrtp::rtp::RawPacket;
use rustyzrtp::transform::{EngineState, MediaPathState, PacketTransformer};
use rustyzrtp::zrtp_core::{RetryPolicy, ZrtpConfig};

#[test]
fn both_sides_agree_on_the_sas() {
    let (a, b) = secure_pair(ZrtpConfig::standard());

    let sas_a = a.engine.sas().unwrap();
    assert_eq!(Some(sas_a.clone()), b.engine.sas());
    assert_eq!(sas_a.len(), 4);
    assert_eq!(a.events.sas.lock().unwrap().as_ref(), Some(&(sas_a, false)));

    for p in [&a, &b] {
        assert_eq!(p.engine.engine_state(), EngineState::Secure);
        assert_eq!(p.engine.media_path_state(), MediaPathState::Secure);
        assert_eq!(p.engine.protocol_state(), Some(ProtocolState::Secure));
        assert_eq!(p.events.established.lock().unwrap().len(), 2);
        assert!(p.events.failures.lock().unwrap().is_empty());
    }
    assert_eq!(a.engine.peer_zid(), Some(b.store.own_zid()));
    assert_eq!(b.engine.peer_zid(), Some(a.store.own_zid()));
}

#[test]
fn verified_sas_is_remembered_for_the_next_call() {
    let (a, b) = secure_pair(ZrtpConfig::standard());
    a.engine.sas_verified();
    b.engine.sas_verified();
    let (store_a, store_b) = (a.store.clone(), b.store.clone());
    a.engine.close();
    b.engine.close();

    let a = Peer::with_store(0xA1, ZrtpConfig::standard(), store_a);
    let b = Peer::with_store(0xB1, ZrtpConfig::standard(), store_b);
    a.engine.start_zrtp();
    b.engine.start_zrtp();
    assert!(pump_until(&a, &b, || a.is_secure() && b.is_secure()));
    assert_eq!(a.events.sas.lock().unwrap().as_ref().map(|s| s.1), Some(true));
}

#[test]
fn corrupted_zrtp_packet_warns_once_and_handshake_recovers() {
    let a = Peer::new(0xA2, ZrtpConfig::standard());
    let b = Peer::new(0xB2, ZrtpConfig::standard());
    a.engine.start_zrtp();
    b.engine.start_zrtp();

    let mut hello = a.outbox.pop().unwrap();
    let last = hello.len() - 1;
    hello[last] ^= 0x5A;
    let state_before = b.engine.protocol_state();
    assert!(b.engine.reverse_transform(RawPacket::from_vec(hello)).is_none());
    assert_eq!(b.events.count(MessageCode::CrcMismatch), 1);
    assert_eq!(b.engine.engine_state(), EngineState::Negotiating);
    assert_eq!(b.engine.protocol_state(), state_before);
    assert_eq!(
        b.events.messages.lock().unwrap()[0],
        (MessageSeverity::Warning, MessageCode::CrcMismatch)
    );

    assert!(pump_until(&a, &b, || a.is_secure() && b.is_secure()));
    assert_eq!(b.events.count(MessageCode::CrcMismatch), 1);
    assert_eq!(a.events.count(MessageCode::CrcMismatch), 0);
}

#[test]
fn silent_peer_is_reported_once_and_media_stays_clear() {
    let mut config = ZrtpConfig::standard();
    config.t1 = RetryPolicy {
        initial: Duration::from_millis(10),
        cap: Duration::from_millis(20),
        max_retries: 3,
    };
    let a = Peer::new(0xA3, config);
    a.engine.start_zrtp();

    let deadline = Instant::now() + Duration::from_secs(3);
    while a.events.not_supported.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(200));
    assert_eq!(a.events.not_supported.load(Ordering::SeqCst), 1);
    assert_eq!(a.outbox.len(), 4, "first Hello plus three resends");
    assert_eq!(a.engine.media_path_state(), MediaPathState::Plaintext);
    assert!(!a.engine.secure_communication_status());

    let out = a.media(1, b"still talking");
    assert_eq!(a.engine.transform(out.clone()), Some(out));
    let inbound = common::rtp(1, 0xB3, b"hello?");
    assert_eq!(a.engine.reverse_transform(inbound.clone()), Some(inbound));
}

#[test]
fn go_clear_needs_the_peer_to_confirm() {
    let mut config = ZrtpConfig::standard();
    config.allow_clear = true;
    let (a, b) = secure_pair(config);

    assert!(a.engine.request_go_clear());
    assert_eq!(a.engine.engine_state(), EngineState::GoClearRequested);
    assert!(pump_until(&a, &b, || b
        .events
        .go_clear_requests
        .load(Ordering::SeqCst)
        == 1));
    assert!(b.engine.secure_communication_status());
    assert_eq!(b.engine.engine_state(), EngineState::GoClearRequested);

    assert!(b.engine.accept_go_clear());
    assert!(pump_until(&a, &b, || !a.engine.secure_communication_status()
        && !b.engine.secure_communication_status()));

    for p in [&a, &b] {
        assert_eq!(p.engine.engine_state(), EngineState::Idle);
        assert_eq!(p.engine.media_path_state(), MediaPathState::Plaintext);
        assert_eq!(p.engine.sas(), None);
        assert_eq!(p.events.disabled.lock().unwrap().len(), 2);
    }
    let clear = a.media(50, b"in the clear");
    let wire = a.engine.transform(clear.clone()).unwrap();
    assert_eq!(wire, clear);
    assert_eq!(b.engine.reverse_transform(wire), Some(clear));
}

#[test]
fn go_clear_is_refused_without_allow_clear() {
    let (a, b) = secure_pair(ZrtpConfig::standard());
    assert!(!a.engine.request_go_clear());
    assert!(!b.engine.accept_go_clear());
    assert_eq!(a.engine.engine_state(), EngineState::Secure);
}

#[test]
fn hello_hash_is_available_after_initialize() {
    let a = Peer::new(0xA4, ZrtpConfig::standard());
    let (version, hash) = a.engine.hello_hash_sep().unwrap();
    assert_eq!(version, "1.10");
    assert_eq!(hash.len(), 64);
    assert_eq!(a.engine.hello_hash(), format!("{version} {hash}"));
}
