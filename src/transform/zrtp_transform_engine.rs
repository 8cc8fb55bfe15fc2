//! Per-stream ZRTP engine sitting in the RTP packet path.
//!
//! Outbound packets are captured for their SSRC and encrypted once sender
//! keys exist; ZRTP control packets are never touched. Inbound packets are
//! split on [`is_zrtp_control_packet`]: control traffic goes to the
//! protocol engine and never reaches the application, media goes through
//! the receiver transform (or the mute window when there is none).
//!
//! All methods take `&self`; the engine is meant to be shared between the
//! send thread, the receive thread and the control plane.

use std::sync::{Arc, atomic::Ordering};
use std::time::Duration;

use crate::identity::Zid;
use crate::protocol::{
    Direction, MessageCode, MessageSeverity, MultiStreamParams, ProtocolState, ZrtpProtocolEngine,
};
use crate::rtp::RawPacket;
use crate::security_events::SecurityEventListener;
use crate::transform::{
    engine_callbacks::EngineShared, engine_error::EngineError, engine_state::EngineState,
    media_path_state::MediaPathState, packet_transformer::PacketTransformer,
    zrtcp_transformer::ZrtcpTransformer, zrtp_context::ZrtpContext, zrtp_transport::ZrtpTransport,
};
use crate::zrtp::{self, ZrtpValidation, is_zrtp_control_packet};
use crate::zrtp_core::{ZrtpConfig, ZrtpCore};
use crate::{sink_debug, sink_error, sink_info, sink_trace, sink_warn};

/// How long `set_start_muted(true)` drops inbound media at most.
pub const START_MUTED_WINDOW: Duration = Duration::from_millis(1500);

pub struct ZrtpTransformEngine {
    shared: Arc<EngineShared>,
}

impl ZrtpTransformEngine {
    #[must_use]
    pub fn new(context: ZrtpContext) -> Self {
        Self {
            shared: Arc::new(EngineShared::new(context)),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Opens the identity store (once per context), builds the reference
    /// protocol engine and starts the timer thread. `config` defaults to
    /// [`ZrtpConfig::standard`]. Returns `false` when ZRTP is unavailable
    /// for this stream; `start_zrtp` must not be called then.
    pub fn initialize(&self, zid_filename: &str, auto_sense: bool, config: Option<ZrtpConfig>) -> bool {
        match self.try_initialize(zid_filename, auto_sense, config) {
            Ok(()) => true,
            Err(e) => {
                sink_error!(self.shared.logger, "[Engine] initialize failed: {}", e);
                false
            }
        }
    }

    pub fn try_initialize(
        &self,
        zid_filename: &str,
        auto_sense: bool,
        config: Option<ZrtpConfig>,
    ) -> Result<(), EngineError> {
        let sh = &self.shared;
        if sh.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let ctx = &sh.context;
        let store = ctx
            .identities
            .open(zid_filename, ctx.file_access.as_deref(), &*sh.logger)?;
        let mut config = config.unwrap_or_else(ZrtpConfig::standard);
        if let Some(id) = sh.client_id() {
            config.set_client_id(&id);
        }
        let core = ZrtpCore::new(Arc::clone(&sh.logger), config, store)?;
        self.initialize_with(Box::new(core), auto_sense)
    }

    /// Same as [`try_initialize`](Self::try_initialize) with a caller-built
    /// protocol engine.
    pub fn initialize_with(
        &self,
        core: Box<dyn ZrtpProtocolEngine>,
        auto_sense: bool,
    ) -> Result<(), EngineError> {
        let sh = &self.shared;
        if sh.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let weak = Arc::downgrade(sh);
        sh.timer.start(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_timeout();
            }
        })?;
        *sh.core() = Some(core);
        sh.auto_sense.store(auto_sense, Ordering::SeqCst);
        sink_info!(sh.logger, "[Engine] initialized (auto_sense={})", auto_sense);
        Ok(())
    }

    /// Sends the first Hello. No-op before `initialize`, after `close`, or
    /// when already started.
    pub fn start_zrtp(&self) {
        let sh = &self.shared;
        if sh.closed.load(Ordering::SeqCst) {
            return;
        }
        let ran = sh.with_core(|core, cb| {
            if cb.started.swap(true, Ordering::SeqCst) {
                return;
            }
            sink_info!(cb.logger, "[Engine] starting ZRTP, ssrc={:#010x}", cb.own_ssrc.load(Ordering::SeqCst));
            cb.set_state(EngineState::Negotiating);
            core.start(cb);
        });
        if ran.is_none() {
            sink_warn!(sh.logger, "[Engine] start_zrtp before initialize");
        }
    }

    /// Stops negotiation and turns off installed secrets. The engine can be
    /// started again afterwards.
    pub fn stop_zrtp(&self) {
        let sh = &self.shared;
        sh.started.store(false, Ordering::SeqCst);
        sh.with_core(|core, cb| core.stop(cb));
        sh.timer.cancel();
        sh.set_state(EngineState::Idle);
        sink_debug!(sh.logger, "[Engine] ZRTP stopped");
    }

    /// Makes the engine inert: stops negotiation, joins the timer thread and
    /// zeroes every installed key before returning.
    pub fn close(&self) {
        let sh = &self.shared;
        if sh.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        sh.started.store(false, Ordering::SeqCst);
        sh.with_core(|core, cb| core.stop(cb));
        sh.timer.stop();
        sh.keyring.teardown_all();
        sh.set_state(EngineState::Closed);
        sh.set_transport(None);
        sink_info!(sh.logger, "[Engine] closed");
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    pub fn set_connector(&self, transport: Arc<dyn ZrtpTransport>) {
        self.shared.set_transport(Some(transport));
    }

    pub fn set_user_callback(&self, listener: Arc<dyn SecurityEventListener>) {
        self.shared.events.set_listener(Some(listener));
    }

    /// SSRC stamped on outgoing ZRTP packets. Normally learned from the first
    /// outbound media packet.
    pub fn set_own_ssrc(&self, ssrc: u32) {
        self.shared.own_ssrc.store(ssrc, Ordering::SeqCst);
    }

    #[must_use]
    pub fn own_ssrc(&self) -> u32 {
        self.shared.own_ssrc.load(Ordering::SeqCst)
    }

    /// Drops unencrypted inbound media until receiver keys are installed,
    /// for at most [`START_MUTED_WINDOW`].
    pub fn set_start_muted(&self, muted: bool) {
        let mute = self.shared.keyring.mute_window();
        if muted {
            mute.arm(START_MUTED_WINDOW);
        } else {
            mute.clear();
        }
    }

    pub fn set_enable_zrtp(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_enable_zrtp(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    /// Client id for the Hello. Applies to engines initialized afterwards.
    pub fn set_client_id(&self, id: &str) {
        self.shared.set_client_id(id);
    }

    /// The RTCP stage sharing this engine's keys.
    #[must_use]
    pub fn rtcp_transformer(&self) -> ZrtcpTransformer {
        ZrtcpTransformer::new(Arc::clone(&self.shared))
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// True while at least one direction is encrypted.
    #[must_use]
    pub fn secure_communication_status(&self) -> bool {
        let keyring = &self.shared.keyring;
        keyring.has(Direction::Sender) || keyring.has(Direction::Receiver)
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.shared.state()
    }

    #[must_use]
    pub fn media_path_state(&self) -> MediaPathState {
        let sh = &self.shared;
        let state = sh.state();
        if state.is_closed() {
            return MediaPathState::Closed;
        }
        let sender = sh.keyring.has(Direction::Sender);
        let receiver = sh.keyring.has(Direction::Receiver);
        if !receiver && sh.keyring.mute_window().is_active() {
            return MediaPathState::Muted;
        }
        if sender && receiver {
            return MediaPathState::Secure;
        }
        match state {
            EngineState::Negotiating => MediaPathState::Negotiating,
            _ if sender || receiver => MediaPathState::Negotiating,
            _ => MediaPathState::Plaintext,
        }
    }

    #[must_use]
    pub fn protocol_state(&self) -> Option<ProtocolState> {
        self.shared.core().as_ref().map(|c| c.state())
    }

    /// The SAS of the current secure session, if it has one.
    #[must_use]
    pub fn sas(&self) -> Option<String> {
        self.shared.sas()
    }

    #[must_use]
    pub fn peer_zid(&self) -> Option<Zid> {
        self.shared.core().as_ref().and_then(|c| c.peer_zid())
    }

    /// `"<version> <hash>"` of our Hello, empty before `initialize`.
    #[must_use]
    pub fn hello_hash(&self) -> String {
        self.shared
            .core()
            .as_ref()
            .map(|c| c.hello_hash())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn hello_hash_sep(&self) -> Option<(String, String)> {
        self.shared.core().as_ref().map(|c| c.hello_hash_parts())
    }

    // ------------------------------------------------------------------
    // Trust and session control
    // ------------------------------------------------------------------

    pub fn sas_verified(&self) {
        self.shared.with_core(|core, _| core.sas_verified());
    }

    pub fn reset_sas_verified(&self) {
        self.shared.with_core(|core, _| core.reset_sas_verified());
    }

    pub fn set_aux_secret(&self, secret: &[u8]) {
        self.shared.with_core(|core, _| core.set_aux_secret(secret));
    }

    #[must_use]
    pub fn multi_stream_params(&self) -> Option<MultiStreamParams> {
        self.shared.core().as_ref().and_then(|c| c.multi_stream_params())
    }

    pub fn set_multi_stream_params(&self, params: &MultiStreamParams) {
        self.shared
            .with_core(|core, _| core.set_multi_stream_params(params));
    }

    #[must_use]
    pub fn is_multi_stream(&self) -> bool {
        self.shared
            .core()
            .as_ref()
            .is_some_and(|c| c.is_multi_stream())
    }

    /// Asks the peer to drop to clear media.
    pub fn request_go_clear(&self) -> bool {
        self.shared
            .with_core(|core, cb| {
                let sent = core.request_go_clear(cb);
                if sent {
                    cb.set_state(EngineState::GoClearRequested);
                }
                sent
            })
            .unwrap_or(false)
    }

    /// Confirms a GoClear the peer sent; media on this stream goes clear.
    pub fn accept_go_clear(&self) -> bool {
        self.shared
            .with_core(|core, cb| core.accept_go_clear(cb))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Packet path helpers
    // ------------------------------------------------------------------

    fn auto_start(&self) {
        let sh = &self.shared;
        if !sh.started.load(Ordering::SeqCst)
            && sh.auto_sense.load(Ordering::SeqCst)
            && sh.enabled.load(Ordering::SeqCst)
            && sh.own_ssrc.load(Ordering::SeqCst) != 0
        {
            self.start_zrtp();
        }
    }

    fn handle_zrtp_packet(&self, packet: &RawPacket) {
        let sh = &self.shared;
        if !sh.enabled.load(Ordering::SeqCst) || !sh.started.load(Ordering::SeqCst) {
            return;
        }
        let bytes = packet.as_slice();
        match zrtp::validate(bytes) {
            ZrtpValidation::Ok => {}
            ZrtpValidation::BadCrc => {
                sh.events
                    .show_message(MessageSeverity::Warning, MessageCode::CrcMismatch);
                sh.events.dispatch_pending();
                return;
            }
            ZrtpValidation::NotZrtp => {
                sink_trace!(sh.logger, "[ZRTP] extension marker without magic, dropped");
                return;
            }
        }
        let (Some(message), Ok(peer_ssrc)) = (zrtp::zrtp_packet::message(bytes), packet.ssrc()) else {
            return;
        };
        sh.with_core(|core, cb| core.process_message(message, peer_ssrc, cb));
    }

    /// A packet decrypted while the core waits for Conf2ACK proves the peer
    /// already has our keys (RFC 6189 §5.6).
    fn emulate_conf2_ack(&self) {
        let sh = &self.shared;
        if !sh.started.load(Ordering::SeqCst) || !sh.awaiting_conf_ack() {
            return;
        }
        sh.with_core(|core, cb| {
            if core.state() == ProtocolState::WaitConfAck {
                sink_debug!(cb.logger, "[ZRTP] SRTP from peer while waiting for Conf2ACK");
                core.conf2_ack_secure(cb);
            }
        });
    }
}

impl PacketTransformer for ZrtpTransformEngine {
    fn transform(&self, packet: RawPacket) -> Option<RawPacket> {
        let sh = &self.shared;
        if is_zrtp_control_packet(packet.as_slice()) || sh.closed.load(Ordering::SeqCst) {
            return Some(packet);
        }
        if sh.enabled.load(Ordering::SeqCst) && sh.own_ssrc.load(Ordering::SeqCst) == 0 {
            if let Ok(ssrc) = packet.ssrc() {
                let _ = sh
                    .own_ssrc
                    .compare_exchange(0, ssrc, Ordering::SeqCst, Ordering::SeqCst);
                self.auto_start();
            }
        }
        let Some(sender) = sh.keyring.sender() else {
            return Some(packet);
        };
        let mut bytes = packet.into_vec();
        match sender.protect_rtp(&mut bytes) {
            Ok(()) => Some(RawPacket::from_vec(bytes)),
            Err(e) => {
                sink_debug!(sh.logger, "[SRTP] protect failed, dropping: {}", e);
                None
            }
        }
    }

    fn reverse_transform(&self, packet: RawPacket) -> Option<RawPacket> {
        let sh = &self.shared;
        let is_zrtp = is_zrtp_control_packet(packet.as_slice());
        if sh.closed.load(Ordering::SeqCst) {
            if is_zrtp || sh.keyring.receiver_ever_installed() {
                return None;
            }
            return Some(packet);
        }
        self.auto_start();

        if is_zrtp {
            self.handle_zrtp_packet(&packet);
            return None;
        }

        let Some(receiver) = sh.keyring.receiver() else {
            if sh.keyring.mute_window().is_active() {
                return None;
            }
            return Some(packet);
        };
        let mut bytes = packet.into_vec();
        match receiver.unprotect_rtp(&mut bytes) {
            Ok(()) => {
                self.emulate_conf2_ack();
                Some(RawPacket::from_vec(bytes))
            }
            Err(e) => {
                sink_debug!(sh.logger, "[SRTP] unprotect failed, dropping: {}", e);
                None
            }
        }
    }
}

impl Drop for ZrtpTransformEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::sync::{Mutex, OnceLock, Weak, mpsc};
    use std::thread;

    use crate::log::NoopLogSink;
    use crate::protocol::{Role, SrtpSecrets, ZrtpCallback};
    use crate::srtp::SrtpCipher;

    #[derive(Default)]
    struct Script {
        received: Vec<(Vec<u8>, u32)>,
        conf2_acks: usize,
        stops: usize,
    }

    /// Stands in for the real state machine: optionally installs fixed keys
    /// on `start` and records what the engine feeds it.
    struct FakeCore {
        script: Arc<Mutex<Script>>,
        role: Role,
        keys_on_start: bool,
        state_after_start: ProtocolState,
        state: ProtocolState,
    }

    impl FakeCore {
        fn boxed(script: &Arc<Mutex<Script>>, role: Role, keys: bool, after: ProtocolState) -> Box<Self> {
            Box::new(Self {
                script: Arc::clone(script),
                role,
                keys_on_start: keys,
                state_after_start: after,
                state: ProtocolState::Initial,
            })
        }
    }

    fn secrets(role: Role) -> SrtpSecrets {
        SrtpSecrets {
            cipher: SrtpCipher::AesCm128,
            auth_tag_len: 10,
            key_initiator: vec![1; 16],
            salt_initiator: vec![2; 14],
            key_responder: vec![3; 16],
            salt_responder: vec![4; 14],
            role,
        }
    }

    impl ZrtpProtocolEngine for FakeCore {
        fn start(&mut self, cb: &dyn ZrtpCallback) {
            cb.send_data_zrtp(&hello_ack());
            if self.keys_on_start {
                let s = secrets(self.role);
                assert!(cb.srtp_secrets_ready(&s, Direction::Sender));
                assert!(cb.srtp_secrets_ready(&s, Direction::Receiver));
                cb.srtp_secrets_on("AES-CM-128/HS80", Some("k7nq"), false);
                cb.send_info(MessageSeverity::Info, MessageCode::SecureStateOn);
            }
            self.state = self.state_after_start;
        }
        fn stop(&mut self, cb: &dyn ZrtpCallback) {
            self.script.lock().unwrap().stops += 1;
            for d in Direction::BOTH {
                cb.srtp_secrets_off(d);
            }
            self.state = ProtocolState::Initial;
        }
        fn process_message(&mut self, message: &[u8], peer_ssrc: u32, _cb: &dyn ZrtpCallback) {
            self.script
                .lock()
                .unwrap()
                .received
                .push((message.to_vec(), peer_ssrc));
        }
        fn process_timeout(&mut self, _cb: &dyn ZrtpCallback) {}
        fn state(&self) -> ProtocolState {
            self.state
        }
        fn conf2_ack_secure(&mut self, _cb: &dyn ZrtpCallback) {
            self.script.lock().unwrap().conf2_acks += 1;
            self.state = ProtocolState::Secure;
        }
        fn sas_verified(&mut self) {}
        fn reset_sas_verified(&mut self) {}
        fn hello_hash(&self) -> String {
            "1.10 ab12".to_string()
        }
        fn hello_hash_parts(&self) -> (String, String) {
            ("1.10".to_string(), "ab12".to_string())
        }
        fn peer_zid(&self) -> Option<Zid> {
            None
        }
        fn set_aux_secret(&mut self, _secret: &[u8]) {}
        fn request_go_clear(&mut self, _cb: &dyn ZrtpCallback) -> bool {
            self.state == ProtocolState::Secure
        }
        fn accept_go_clear(&mut self, _cb: &dyn ZrtpCallback) -> bool {
            false
        }
        fn multi_stream_params(&self) -> Option<MultiStreamParams> {
            None
        }
        fn set_multi_stream_params(&mut self, _params: &MultiStreamParams) {}
        fn is_multi_stream(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Vec<u8>>>);

    impl ZrtpTransport for Outbox {
        fn send_raw_bytes(&self, bytes: &[u8]) -> bool {
            self.0.lock().unwrap().push(bytes.to_vec());
            true
        }
    }

    #[derive(Default)]
    struct Events {
        messages: Mutex<Vec<(MessageSeverity, MessageCode)>>,
        established: Mutex<Vec<Direction>>,
        sas: Mutex<Option<String>>,
    }

    impl SecurityEventListener for Events {
        fn sas_computed(&self, sas: &str, _verified: bool) {
            *self.sas.lock().unwrap() = Some(sas.to_string());
        }
        fn security_established(&self, direction: Direction, _cipher: &str) {
            self.established.lock().unwrap().push(direction);
        }
        fn message(&self, severity: MessageSeverity, code: MessageCode) {
            self.messages.lock().unwrap().push((severity, code));
        }
    }

    fn hello_ack() -> Vec<u8> {
        let mut m = vec![0x50, 0x5A, 0x00, 0x03];
        m.extend_from_slice(b"HelloACK");
        m
    }

    fn rtp(seq: u16, ssrc: u32, payload: &[u8]) -> RawPacket {
        let mut b = vec![0x80, 0x60];
        b.extend_from_slice(&seq.to_be_bytes());
        b.extend_from_slice(&(u32::from(seq) * 160).to_be_bytes());
        b.extend_from_slice(&ssrc.to_be_bytes());
        b.extend_from_slice(payload);
        RawPacket::from_vec(b)
    }

    struct Rig {
        engine: ZrtpTransformEngine,
        script: Arc<Mutex<Script>>,
        outbox: Arc<Outbox>,
        events: Arc<Events>,
    }

    fn rig(role: Role, keys: bool, after: ProtocolState, auto_sense: bool) -> Rig {
        let engine = ZrtpTransformEngine::new(ZrtpContext::new(Arc::new(NoopLogSink)));
        let script = Arc::new(Mutex::new(Script::default()));
        engine
            .initialize_with(FakeCore::boxed(&script, role, keys, after), auto_sense)
            .unwrap();
        let outbox = Arc::new(Outbox::default());
        engine.set_connector(outbox.clone());
        let events = Arc::new(Events::default());
        engine.set_user_callback(events.clone());
        Rig {
            engine,
            script,
            outbox,
            events,
        }
    }

    #[test]
    fn zrtp_packets_are_consumed_and_reach_the_core() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, false);
        r.engine.set_own_ssrc(0x1111);
        r.engine.start_zrtp();
        assert!(r.engine.is_started());
        assert_eq!(r.engine.engine_state(), EngineState::Negotiating);

        let sent = r.outbox.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(zrtp::validate(&sent[0]), ZrtpValidation::Ok);
        assert_eq!(zrtp::zrtp_packet::ssrc(&sent[0]), Some(0x1111));

        let inbound = zrtp::encode(&hello_ack(), 5, 0x2222);
        assert!(r.engine.reverse_transform(inbound).is_none());
        let script = r.script.lock().unwrap();
        assert_eq!(script.received, vec![(hello_ack(), 0x2222)]);
    }

    #[test]
    fn zrtp_is_ignored_until_started() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, false);
        let inbound = zrtp::encode(&hello_ack(), 1, 0x2222);
        assert!(r.engine.reverse_transform(inbound).is_none());
        assert!(r.script.lock().unwrap().received.is_empty());
    }

    #[test]
    fn crc_mismatch_is_reported_once_and_not_processed() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, false);
        r.engine.set_own_ssrc(7);
        r.engine.start_zrtp();

        let mut bytes = zrtp::encode(&hello_ack(), 9, 0x2222).into_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(r.engine.reverse_transform(RawPacket::from_vec(bytes)).is_none());

        assert!(r.script.lock().unwrap().received.is_empty());
        assert_eq!(r.engine.engine_state(), EngineState::Negotiating);
        assert_eq!(
            *r.events.messages.lock().unwrap(),
            vec![(MessageSeverity::Warning, MessageCode::CrcMismatch)]
        );
    }

    #[test]
    fn first_outbound_packet_sets_ssrc_and_auto_starts() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, true);
        assert!(!r.engine.is_started());
        let pkt = rtp(1, 0xABCD_0001, b"voice");
        let out = r.engine.transform(pkt.clone()).unwrap();
        assert_eq!(out, pkt);
        assert_eq!(r.engine.own_ssrc(), 0xABCD_0001);
        assert!(r.engine.is_started());
        let sent = r.outbox.0.lock().unwrap().clone();
        assert_eq!(zrtp::zrtp_packet::ssrc(&sent[0]), Some(0xABCD_0001));
    }

    #[test]
    fn no_auto_start_without_auto_sense_or_when_disabled() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, false);
        let _ = r.engine.transform(rtp(1, 5, b"x"));
        assert!(!r.engine.is_started());

        let r = rig(Role::Initiator, false, ProtocolState::Detect, true);
        r.engine.set_enable_zrtp(false);
        let _ = r.engine.transform(rtp(1, 5, b"x"));
        assert_eq!(r.engine.own_ssrc(), 0);
        assert!(!r.engine.is_started());
    }

    #[test]
    fn zrtp_packets_pass_outbound_untouched_even_when_secure() {
        let r = rig(Role::Initiator, true, ProtocolState::Secure, false);
        r.engine.set_own_ssrc(1);
        r.engine.start_zrtp();
        let pkt = zrtp::encode(&hello_ack(), 3, 1);
        assert_eq!(r.engine.transform(pkt.clone()), Some(pkt));
    }

    #[test]
    fn installed_keys_protect_media_end_to_end() {
        let a = rig(Role::Initiator, true, ProtocolState::Secure, false);
        let b = rig(Role::Responder, true, ProtocolState::Secure, false);
        for (r, ssrc) in [(&a, 0xA), (&b, 0xB)] {
            r.engine.set_own_ssrc(ssrc);
            r.engine.start_zrtp();
            assert!(r.engine.secure_communication_status());
            assert_eq!(r.engine.media_path_state(), MediaPathState::Secure);
            assert_eq!(r.engine.engine_state(), EngineState::Secure);
            assert_eq!(r.engine.sas().as_deref(), Some("k7nq"));
        }
        assert_eq!(a.events.sas.lock().unwrap().as_deref(), Some("k7nq"));
        assert_eq!(a.events.established.lock().unwrap().len(), 2);

        let plain = rtp(10, 0xA, b"hello bob");
        let wire = a.engine.transform(plain.clone()).unwrap();
        assert_ne!(wire, plain);
        assert_eq!(wire.len(), plain.len() + 10);
        assert_eq!(b.engine.reverse_transform(wire.clone()), Some(plain));
        assert!(b.engine.reverse_transform(wire).is_none(), "replay dropped");

        let mut tampered = a.engine.transform(rtp(11, 0xA, b"again")).unwrap().into_vec();
        tampered[13] ^= 1;
        assert!(b.engine.reverse_transform(RawPacket::from_vec(tampered)).is_none());

        let back = b.engine.transform(rtp(1, 0xB, b"hi alice")).unwrap();
        assert_eq!(
            a.engine.reverse_transform(back).unwrap().payload().unwrap(),
            b"hi alice"
        );
    }

    #[test]
    fn decrypted_media_stands_in_for_a_lost_conf2_ack() {
        let a = rig(Role::Initiator, true, ProtocolState::WaitConfAck, false);
        let b = rig(Role::Responder, true, ProtocolState::Secure, false);
        a.engine.set_own_ssrc(0xA);
        b.engine.set_own_ssrc(0xB);
        a.engine.start_zrtp();
        b.engine.start_zrtp();
        assert_eq!(a.engine.protocol_state(), Some(ProtocolState::WaitConfAck));

        let wire = b.engine.transform(rtp(1, 0xB, b"media")).unwrap();
        assert!(a.engine.reverse_transform(wire).is_some());
        assert_eq!(a.script.lock().unwrap().conf2_acks, 1);
        assert_eq!(a.engine.protocol_state(), Some(ProtocolState::Secure));

        let wire = b.engine.transform(rtp(2, 0xB, b"media")).unwrap();
        assert!(a.engine.reverse_transform(wire).is_some());
        assert_eq!(a.script.lock().unwrap().conf2_acks, 1);
    }

    #[test]
    fn start_muted_drops_clear_media_until_the_window_ends() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, false);
        r.engine.set_start_muted(true);
        assert_eq!(r.engine.media_path_state(), MediaPathState::Muted);
        for seq in 0..10 {
            assert!(r.engine.reverse_transform(rtp(seq, 9, b"early")).is_none());
        }
        r.engine.set_start_muted(false);
        assert!(r.engine.reverse_transform(rtp(10, 9, b"late")).is_some());

        r.engine.set_start_muted(true);
        thread::sleep(START_MUTED_WINDOW + Duration::from_millis(100));
        assert!(r.engine.reverse_transform(rtp(11, 9, b"late")).is_some());
        assert_eq!(r.engine.media_path_state(), MediaPathState::Plaintext);
    }

    #[test]
    fn receiver_keys_end_the_mute_window() {
        let r = rig(Role::Responder, true, ProtocolState::Secure, false);
        r.engine.set_start_muted(true);
        r.engine.set_own_ssrc(3);
        r.engine.start_zrtp();
        assert_ne!(r.engine.media_path_state(), MediaPathState::Muted);
    }

    #[test]
    fn stop_turns_keys_off_and_allows_restart() {
        let r = rig(Role::Initiator, true, ProtocolState::Secure, false);
        r.engine.set_own_ssrc(1);
        r.engine.start_zrtp();
        r.engine.stop_zrtp();
        assert!(!r.engine.is_started());
        assert!(!r.engine.secure_communication_status());
        assert_eq!(r.engine.engine_state(), EngineState::Idle);
        assert_eq!(r.engine.sas(), None);
        let pkt = rtp(5, 1, b"clear");
        assert_eq!(r.engine.transform(pkt.clone()), Some(pkt));

        r.engine.start_zrtp();
        assert!(r.engine.is_started());
        assert_eq!(r.script.lock().unwrap().stops, 1);
    }

    #[test]
    fn closed_engine_is_inert() {
        let r = rig(Role::Initiator, true, ProtocolState::Secure, false);
        r.engine.set_own_ssrc(1);
        r.engine.start_zrtp();
        r.engine.close();
        r.engine.close();

        assert_eq!(r.engine.engine_state(), EngineState::Closed);
        assert_eq!(r.engine.media_path_state(), MediaPathState::Closed);
        assert!(!r.engine.secure_communication_status());

        let pkt = rtp(1, 1, b"after close");
        assert_eq!(r.engine.transform(pkt.clone()), Some(pkt.clone()));
        assert!(r.engine.reverse_transform(pkt).is_none());
        assert!(r.engine.reverse_transform(zrtp::encode(&hello_ack(), 1, 2)).is_none());

        r.engine.start_zrtp();
        assert!(!r.engine.is_started());
        assert!(matches!(
            r.engine.initialize_with(FakeCore::boxed(&r.script, Role::Initiator, false, ProtocolState::Detect), false),
            Err(EngineError::Closed)
        ));
    }

    #[test]
    fn uninitialized_engine_answers_with_defaults() {
        let engine = ZrtpTransformEngine::new(ZrtpContext::new(Arc::new(NoopLogSink)));
        assert_eq!(engine.hello_hash(), "");
        assert_eq!(engine.hello_hash_sep(), None);
        assert_eq!(engine.protocol_state(), None);
        assert!(!engine.request_go_clear());
        engine.start_zrtp();
        assert!(!engine.is_started());
        let pkt = rtp(1, 1, b"x");
        assert_eq!(engine.reverse_transform(pkt.clone()), Some(pkt));
    }

    #[test]
    fn hello_hash_comes_from_the_core() {
        let r = rig(Role::Initiator, false, ProtocolState::Detect, false);
        assert_eq!(r.engine.hello_hash(), "1.10 ab12");
        assert_eq!(
            r.engine.hello_hash_sep(),
            Some(("1.10".to_string(), "ab12".to_string()))
        );
    }

    #[test]
    fn go_clear_request_moves_engine_state() {
        let r = rig(Role::Initiator, true, ProtocolState::Secure, false);
        r.engine.set_own_ssrc(1);
        r.engine.start_zrtp();
        assert!(r.engine.request_go_clear());
        assert_eq!(r.engine.engine_state(), EngineState::GoClearRequested);
    }

    #[test]
    fn rtcp_shares_the_rtp_keys() {
        let a = rig(Role::Initiator, true, ProtocolState::Secure, false);
        let b = rig(Role::Responder, true, ProtocolState::Secure, false);
        a.engine.set_own_ssrc(0xA);
        b.engine.set_own_ssrc(0xB);
        a.engine.start_zrtp();
        b.engine.start_zrtp();

        let mut rr = vec![0x81, 201, 0x00, 0x07];
        rr.extend_from_slice(&0xAu32.to_be_bytes());
        rr.extend_from_slice(&[0u8; 24]);
        let plain = RawPacket::from_vec(rr);

        let wire = a.engine.rtcp_transformer().transform(plain.clone()).unwrap();
        assert_ne!(wire, plain);
        assert_eq!(b.engine.rtcp_transformer().reverse_transform(wire), Some(plain));
    }

    /// Stops its own engine as soon as the SAS is shown.
    #[derive(Default)]
    struct StopOnSas {
        engine: OnceLock<Weak<ZrtpTransformEngine>>,
        seen: Mutex<Vec<String>>,
    }

    impl SecurityEventListener for StopOnSas {
        fn sas_computed(&self, sas: &str, _verified: bool) {
            self.seen.lock().unwrap().push(sas.to_string());
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                engine.stop_zrtp();
            }
        }
    }

    #[test]
    fn listener_may_call_back_into_the_engine() {
        let script = Arc::new(Mutex::new(Script::default()));
        let engine = Arc::new(ZrtpTransformEngine::new(ZrtpContext::new(Arc::new(NoopLogSink))));
        engine
            .initialize_with(FakeCore::boxed(&script, Role::Initiator, true, ProtocolState::Secure), false)
            .unwrap();
        engine.set_connector(Arc::new(Outbox::default()));
        let listener = Arc::new(StopOnSas::default());
        assert!(listener.engine.set(Arc::downgrade(&engine)).is_ok());
        engine.set_user_callback(listener.clone());
        engine.set_own_ssrc(1);

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&engine);
        thread::spawn(move || {
            worker.start_zrtp();
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(3))
            .expect("start_zrtp blocked inside the listener");

        assert_eq!(*listener.seen.lock().unwrap(), vec!["k7nq".to_string()]);
        assert_eq!(script.lock().unwrap().stops, 1);
        assert!(!engine.is_started());
        assert!(!engine.secure_communication_status());
        assert_eq!(engine.engine_state(), EngineState::Idle);
    }

    #[test]
    fn secure_media_is_decrypted_without_the_protocol_lock() {
        let a = rig(Role::Initiator, true, ProtocolState::Secure, false);
        let b = rig(Role::Responder, true, ProtocolState::Secure, false);
        a.engine.set_own_ssrc(0xA);
        b.engine.set_own_ssrc(0xB);
        a.engine.start_zrtp();
        b.engine.start_zrtp();
        let wire = b.engine.transform(rtp(1, 0xB, b"media")).unwrap();

        let (tx, rx) = mpsc::channel();
        let engine = &a.engine;
        let held = engine.shared.core();
        let out = thread::scope(|s| {
            s.spawn(move || {
                let _ = tx.send(engine.reverse_transform(wire));
            });
            let out = rx.recv_timeout(Duration::from_secs(3));
            drop(held);
            out
        });
        let out = out.expect("decrypting waited on the protocol lock");
        assert_eq!(out.unwrap().payload().unwrap(), b"media");
        assert_eq!(a.script.lock().unwrap().conf2_acks, 0);
    }
}
