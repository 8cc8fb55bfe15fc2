//! Two engines wired back to back through in-memory queues.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

use rustyzrtp::identity::ZidStore;
use rustyzrtp::log::NoopLogSink;
use rustyzrtp::protocol::{Direction, MessageCode, MessageSeverity};
use rustyzrtp::rtp::RawPacket;
use rustyzrtp::security_events::SecurityEventListener;
use rustyzrtp::transform::{PacketTransformer, ZrtpContext, ZrtpTransformEngine, ZrtpTransport};
use rustyzrtp::zrtp_core::ZrtpConfig;

pub const DEADLINE: Duration = Duration::from_secs(5);

/// Outbound ZRTP packets wait here until the test delivers them; delivering
/// from inside `send_raw_bytes` would re-enter the peer under its lock.
#[derive(Default)]
pub struct QueueTransport {
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl QueueTransport {
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl ZrtpTransport for QueueTransport {
    fn send_raw_bytes(&self, bytes: &[u8]) -> bool {
        self.queue.lock().unwrap().push_back(bytes.to_vec());
        true
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub messages: Mutex<Vec<(MessageSeverity, MessageCode)>>,
    pub sas: Mutex<Option<(String, bool)>>,
    pub established: Mutex<Vec<Direction>>,
    pub disabled: Mutex<Vec<Direction>>,
    pub failures: Mutex<Vec<MessageCode>>,
    pub not_supported: AtomicUsize,
    pub go_clear_requests: AtomicUsize,
}

impl RecordingListener {
    pub fn count(&self, code: MessageCode) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| *c == code)
            .count()
    }
}

impl SecurityEventListener for RecordingListener {
    fn sas_computed(&self, sas: &str, verified: bool) {
        *self.sas.lock().unwrap() = Some((sas.to_string(), verified));
    }
    fn security_established(&self, direction: Direction, _cipher: &str) {
        self.established.lock().unwrap().push(direction);
    }
    fn security_disabled(&self, direction: Direction) {
        self.disabled.lock().unwrap().push(direction);
    }
    fn message(&self, severity: MessageSeverity, code: MessageCode) {
        self.messages.lock().unwrap().push((severity, code));
    }
    fn negotiation_failed(&self, code: MessageCode) {
        self.failures.lock().unwrap().push(code);
    }
    fn peer_does_not_support_protocol(&self) {
        self.not_supported.fetch_add(1, Ordering::SeqCst);
    }
    fn go_clear_confirmation_requested(&self) {
        self.go_clear_requests.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Peer {
    pub engine: ZrtpTransformEngine,
    pub outbox: Arc<QueueTransport>,
    pub events: Arc<RecordingListener>,
    pub store: Arc<ZidStore>,
    pub ssrc: u32,
}

impl Peer {
    pub fn new(ssrc: u32, config: ZrtpConfig) -> Self {
        Self::with_store(ssrc, config, Arc::new(ZidStore::in_memory()))
    }

    pub fn with_store(ssrc: u32, config: ZrtpConfig, store: Arc<ZidStore>) -> Self {
        let context = ZrtpContext::with_identity_store(Arc::new(NoopLogSink), Arc::clone(&store));
        let engine = ZrtpTransformEngine::new(context);
        assert!(engine.initialize("test.zid", false, Some(config)));
        let outbox = Arc::new(QueueTransport::default());
        engine.set_connector(outbox.clone());
        let events = Arc::new(RecordingListener::default());
        engine.set_user_callback(events.clone());
        engine.set_own_ssrc(ssrc);
        Self {
            engine,
            outbox,
            events,
            store,
            ssrc,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.engine.secure_communication_status() && self.engine.sas().is_some()
    }

    /// An RTP packet from this peer, in the clear.
    pub fn media(&self, seq: u16, payload: &[u8]) -> RawPacket {
        rtp(seq, self.ssrc, payload)
    }
}

pub fn rtp(seq: u16, ssrc: u32, payload: &[u8]) -> RawPacket {
    let mut b = vec![0x80, 0x00];
    b.extend_from_slice(&seq.to_be_bytes());
    b.extend_from_slice(&(u32::from(seq) * 160).to_be_bytes());
    b.extend_from_slice(&ssrc.to_be_bytes());
    b.extend_from_slice(payload);
    RawPacket::from_vec(b)
}

/// Moves queued ZRTP packets between the peers until `done` holds or the
/// deadline passes. ZRTP input never surfaces as media.
pub fn pump_until(a: &Peer, b: &Peer, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    loop {
        let mut moved = false;
        while let Some(pkt) = a.outbox.pop() {
            assert!(b.engine.reverse_transform(RawPacket::from_vec(pkt)).is_none());
            moved = true;
        }
        while let Some(pkt) = b.outbox.pop() {
            assert!(a.engine.reverse_transform(RawPacket::from_vec(pkt)).is_none());
            moved = true;
        }
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        if !moved {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

/// Starts both peers and runs the handshake to completion.
pub fn secure_pair(config: ZrtpConfig) -> (Peer, Peer) {
    let a = Peer::new(0xA000_0001, config.clone());
    let b = Peer::new(0xB000_0002, config);
    a.engine.start_zrtp();
    b.engine.start_zrtp();
    assert!(
        pump_until(&a, &b, || a.is_secure() && b.is_secure()),
        "handshake did not complete"
    );
    (a, b)
}
