use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::identity::{ZidRecord, ZidStore, Zid};
use crate::log::log_sink::LogSink;
use crate::protocol::{
    Direction, MessageCode, MessageSeverity, MultiStreamParams, ProtocolState, Role,
    ZrtpCallback, ZrtpErrorCode, ZrtpProtocolEngine,
};
use crate::zrtp_core::{
    algorithms::{KeyAgreement, Negotiated},
    confirm_cipher::{cfb_decrypt, cfb_encrypt},
    hash_chain::{HashChain, PeerHashChain},
    kdf::{
        LABEL_MSK, MAC_LEN, compute_s0, constant_time_eq, kdf32, mac8, sha256, verify_trailing_mac,
    },
    key_schedule::KeySchedule,
    messages::{
        CONFIRM_IV_LEN, Commit, CommitValue, Confirm, ConfirmBody, DhPart, Hello, NONCE_LEN,
        TYPE_CLEAR_ACK, TYPE_CONF2_ACK, TYPE_ERROR_ACK, TYPE_HELLO_ACK, ZRTP_VERSION, ZrtpMessage,
        encode_ack, encode_error, encode_go_clear,
    },
    sas::render_b32,
    zrtp_config::{RetryPolicy, ZrtpConfig},
    zrtp_core_error::ZrtpCoreError,
};
use crate::{sink_debug, sink_info, sink_trace, sink_warn};

const GO_CLEAR_LABEL: &[u8] = b"GoClear ";

/// The message being retransmitted and where its schedule stands.
struct Retry {
    message: Vec<u8>,
    policy: RetryPolicy,
    delay: Duration,
    count: u32,
}

/// Per-negotiation state, dropped as a whole on stop or restart.
#[derive(Default)]
struct Exchange {
    peer_hello: Option<Hello>,
    peer_hello_bytes: Vec<u8>,
    peer_chain: PeerHashChain,
    hello_verified: bool,
    peer_commit: Option<Commit>,
    peer_commit_bytes: Vec<u8>,
    commit_verified: bool,
    peer_dh_bytes: Vec<u8>,
    dh_verified: bool,

    own_commit: Option<Commit>,
    own_commit_bytes: Vec<u8>,
    own_dh_bytes: Vec<u8>,
    dh_secret: Option<StaticSecret>,

    role: Option<Role>,
    negotiated: Option<Negotiated>,
    record: Option<ZidRecord>,
    rs_matched: bool,
    peer_allows_clear: bool,

    /// Last input that produced a one-shot reply, and that reply. A
    /// retransmission of the input gets the same reply again.
    reply_to: Vec<u8>,
    reply: Vec<u8>,
}

/// Reference ZRTP state machine (RFC 6189) with X25519 key agreement,
/// multi-stream mode, retained secrets and GoClear.
pub struct ZrtpCore {
    logger: Arc<dyn LogSink>,
    config: ZrtpConfig,
    store: Arc<ZidStore>,
    own_zid: Zid,
    chain: HashChain,
    hello_bytes: Vec<u8>,
    state: ProtocolState,
    ex: Exchange,
    keys: Option<KeySchedule>,
    retry: Option<Retry>,
    multi_stream_key: Option<[u8; 32]>,
    aux_secret: Option<Vec<u8>>,
    sas: Option<String>,
    sas_verified: bool,
    go_clear_pending: bool,
    installed: [bool; 2],
    peer_ssrc: u32,
}

fn direction_index(direction: Direction) -> usize {
    match direction {
        Direction::Sender => 0,
        Direction::Receiver => 1,
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Initiator => "Initiator",
        Role::Responder => "Responder",
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ZrtpCore {
    pub fn new(
        logger: Arc<dyn LogSink>,
        config: ZrtpConfig,
        store: Arc<ZidStore>,
    ) -> Result<Self, ZrtpCoreError> {
        let own_zid = store.own_zid();
        let chain = HashChain::generate();
        let hello = Hello {
            version: *ZRTP_VERSION,
            client_id: config.client_id_bytes(),
            h3: *chain.h3(),
            zid: own_zid,
            sig_capable: false,
            mitm: false,
            passive: false,
            algorithms: config.algorithms.clone(),
        };
        let hello_bytes = hello.encode(chain.h2())?;
        sink_debug!(
            logger,
            "[ZRTP] core ready: zid={} client={}",
            hex::encode(own_zid),
            config.client_id
        );

        Ok(Self {
            logger,
            config,
            store,
            own_zid,
            chain,
            hello_bytes,
            state: ProtocolState::Initial,
            ex: Exchange::default(),
            keys: None,
            retry: None,
            multi_stream_key: None,
            aux_secret: None,
            sas: None,
            sas_verified: false,
            go_clear_pending: false,
            installed: [false; 2],
            peer_ssrc: 0,
        })
    }

    /// SAS of the current session once the DH exchange produced one.
    #[must_use]
    pub fn sas(&self) -> Option<&str> {
        self.sas.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.ex.role
    }

    #[must_use]
    pub fn peer_ssrc(&self) -> u32 {
        self.peer_ssrc
    }

    // ------------------------------------------------------------------
    // Sending and timers
    // ------------------------------------------------------------------

    fn send(&self, message: &[u8], cb: &dyn ZrtpCallback) {
        if !cb.send_data_zrtp(message) {
            cb.send_info(MessageSeverity::Severe, MessageCode::CannotSend);
        }
    }

    fn send_with_retry(&mut self, message: Vec<u8>, policy: RetryPolicy, cb: &dyn ZrtpCallback) {
        self.send(&message, cb);
        self.retry = Some(Retry {
            message,
            policy,
            delay: policy.initial,
            count: 0,
        });
        cb.activate_timer(policy.initial);
    }

    fn send_reply(&mut self, trigger: &[u8], reply: Vec<u8>, cb: &dyn ZrtpCallback) {
        self.send(&reply, cb);
        self.ex.reply_to = trigger.to_vec();
        self.ex.reply = reply;
    }

    fn cancel_retry(&mut self, cb: &dyn ZrtpCallback) {
        if self.retry.take().is_some() {
            cb.cancel_timer();
        }
    }

    fn retries_exhausted(&mut self, cb: &dyn ZrtpCallback) {
        sink_warn!(self.logger, "[ZRTP] retries exhausted in {:?}", self.state);
        match self.state {
            ProtocolState::Detect => {
                self.state = ProtocolState::Initial;
                cb.not_supported_by_other();
            }
            ProtocolState::WaitClearAck => {
                self.state = ProtocolState::Secure;
                cb.send_info(MessageSeverity::Warning, MessageCode::GoClearRejected);
            }
            ProtocolState::WaitErrorAck => {
                self.state = ProtocolState::Initial;
            }
            _ => {
                self.secrets_off(cb);
                self.state = ProtocolState::Initial;
                cb.negotiation_failed(MessageSeverity::Severe, MessageCode::TooMuchRetries);
            }
        }
    }

    fn secrets_off(&mut self, cb: &dyn ZrtpCallback) {
        for direction in Direction::BOTH {
            let slot = &mut self.installed[direction_index(direction)];
            if *slot {
                *slot = false;
                cb.srtp_secrets_off(direction);
            }
        }
    }

    fn negotiating(&self) -> bool {
        !matches!(
            self.state,
            ProtocolState::Initial
                | ProtocolState::Secure
                | ProtocolState::Clear
                | ProtocolState::WaitClearAck
                | ProtocolState::WaitErrorAck
        )
    }

    /// Aborts a running exchange: sends Error and waits for its ErrorACK.
    /// Outside negotiation the offending message is only logged.
    fn fail(&mut self, code: ZrtpErrorCode, cb: &dyn ZrtpCallback) {
        if !self.negotiating() {
            sink_warn!(self.logger, "[ZRTP] ignoring {} in {:?}", code, self.state);
            return;
        }
        sink_warn!(self.logger, "[ZRTP] aborting in {:?}: {}", self.state, code);
        self.cancel_retry(cb);
        self.secrets_off(cb);
        self.keys = None;
        self.state = ProtocolState::WaitErrorAck;
        let policy = self.config.t2;
        self.send_with_retry(encode_error(code), policy, cb);
        cb.negotiation_failed(MessageSeverity::Error, MessageCode::Zrtp(code));
    }

    // ------------------------------------------------------------------
    // Message handlers
    // ------------------------------------------------------------------

    fn dispatch(
        &mut self,
        message: ZrtpMessage,
        raw: &[u8],
        cb: &dyn ZrtpCallback,
    ) -> Result<(), ZrtpCoreError> {
        match message {
            ZrtpMessage::Hello(hello) => self.on_hello(hello, raw, cb),
            ZrtpMessage::HelloAck => self.on_hello_ack(cb),
            ZrtpMessage::Commit(commit) => self.on_commit(commit, raw, cb),
            ZrtpMessage::DhPart1(part) => self.on_dh_part1(part, raw, cb),
            ZrtpMessage::DhPart2(part) => self.on_dh_part2(part, raw, cb),
            ZrtpMessage::Confirm1(confirm) => self.on_confirm1(&confirm, cb),
            ZrtpMessage::Confirm2(confirm) => self.on_confirm2(&confirm, raw, cb),
            ZrtpMessage::Conf2Ack => self.on_conf2_ack(cb),
            ZrtpMessage::Error(code) => {
                self.on_error(code, cb);
                Ok(())
            }
            ZrtpMessage::ErrorAck => {
                if self.state == ProtocolState::WaitErrorAck {
                    self.cancel_retry(cb);
                    self.state = ProtocolState::Initial;
                }
                Ok(())
            }
            ZrtpMessage::GoClear(clear_mac) => self.on_go_clear(&clear_mac, raw, cb),
            ZrtpMessage::ClearAck => {
                self.on_clear_ack(cb);
                Ok(())
            }
        }
    }

    fn on_hello(&mut self, hello: Hello, raw: &[u8], cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        if !matches!(
            self.state,
            ProtocolState::Detect | ProtocolState::AckSent | ProtocolState::AckDetected
        ) {
            return Ok(());
        }
        if !hello.version.starts_with(b"1.") {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::UnsupportedVersion));
        }
        if hello.zid == self.own_zid {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::EqualZid));
        }

        if self.ex.peer_hello.is_none() {
            if !self.ex.peer_chain.reveal(3, hello.h3) {
                return Ok(());
            }
            sink_info!(
                self.logger,
                "[ZRTP] Hello from zid={} client={:?}",
                hex::encode(hello.zid),
                String::from_utf8_lossy(&hello.client_id).trim_end()
            );
            self.ex.record = self.store.record(&hello.zid);
            self.ex.peer_hello_bytes = raw.to_vec();
            self.ex.peer_hello = Some(hello);
            cb.send_info(MessageSeverity::Info, MessageCode::HelloReceived);
        } else if self.ex.peer_hello_bytes != raw {
            // A second, different Hello from the same stream.
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::HelloComponentsMismatch));
        }

        match self.state {
            ProtocolState::Detect => {
                // Keep resending our Hello until the peer acknowledges it.
                self.send_reply(raw, encode_ack(TYPE_HELLO_ACK), cb);
                self.state = ProtocolState::AckSent;
            }
            ProtocolState::AckSent => {
                self.send_reply(raw, encode_ack(TYPE_HELLO_ACK), cb);
            }
            _ => {
                self.cancel_retry(cb);
                self.send_commit(cb)?;
            }
        }
        Ok(())
    }

    fn on_hello_ack(&mut self, cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        match self.state {
            ProtocolState::Detect => {
                self.cancel_retry(cb);
                self.state = ProtocolState::AckDetected;
            }
            ProtocolState::AckSent => {
                self.cancel_retry(cb);
                self.send_commit(cb)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn send_commit(&mut self, cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        let peer = self
            .ex
            .peer_hello
            .as_ref()
            .ok_or(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError))?;
        let negotiated = Negotiated::choose(
            &self.config.algorithms,
            &peer.algorithms,
            self.multi_stream_key.is_some(),
        );

        let value = match negotiated.key_agreement {
            KeyAgreement::Mult => CommitValue::Nonce(random_bytes::<NONCE_LEN>()),
            KeyAgreement::X255 => {
                let secret = StaticSecret::random_from_rng(OsRng);
                let public = PublicKey::from(&secret);
                let part2 = self.build_dh_part(Role::Initiator, public.to_bytes())?;
                let part2_bytes = part2.encode(false, self.chain.h0())?;
                let hvi = sha256(&[&part2_bytes, &self.ex.peer_hello_bytes]);
                self.ex.dh_secret = Some(secret);
                self.ex.own_dh_bytes = part2_bytes;
                CommitValue::Hvi(hvi)
            }
        };

        let commit = Commit {
            h2: *self.chain.h2(),
            zid: self.own_zid,
            negotiated,
            value,
        };
        let bytes = commit.encode(self.chain.h1())?;
        sink_debug!(
            self.logger,
            "[ZRTP] Commit sent: {} {:?}",
            negotiated.cipher_name(),
            negotiated.key_agreement
        );
        self.ex.negotiated = Some(negotiated);
        self.ex.own_commit = Some(commit);
        self.ex.own_commit_bytes = bytes.clone();
        self.state = ProtocolState::CommitSent;
        let policy = self.config.t2;
        self.send_with_retry(bytes, policy, cb);
        cb.send_info(MessageSeverity::Info, MessageCode::CommitDhGenerated);
        Ok(())
    }

    fn build_dh_part(&self, role: Role, pv: [u8; 32]) -> Result<DhPart, ZrtpCoreError> {
        let label = role_label(role).as_bytes();
        let mut ids = [random_bytes::<MAC_LEN>(), random_bytes::<MAC_LEN>()];
        if let Some(record) = &self.ex.record {
            for (slot, rs) in ids.iter_mut().zip([record.rs1, record.rs2]) {
                if let Some(rs) = rs {
                    *slot = mac8(&rs, label)?;
                }
            }
        }
        let aux_id = match &self.aux_secret {
            Some(aux) => mac8(aux, self.chain.h3())?,
            None => random_bytes::<MAC_LEN>(),
        };
        Ok(DhPart {
            h1: *self.chain.h1(),
            rs1_id: ids[0],
            rs2_id: ids[1],
            aux_id,
            pbx_id: random_bytes::<MAC_LEN>(),
            pv,
        })
    }

    fn on_commit(&mut self, commit: Commit, raw: &[u8], cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        if !matches!(
            self.state,
            ProtocolState::AckSent | ProtocolState::AckDetected | ProtocolState::CommitSent
        ) {
            return Ok(());
        }
        let Some(peer_zid) = self.ex.peer_hello.as_ref().map(|h| h.zid) else {
            sink_debug!(self.logger, "[ZRTP] Commit before Hello, ignored");
            return Ok(());
        };
        if !self.ex.peer_chain.reveal(2, commit.h2) {
            cb.send_info(MessageSeverity::Severe, MessageCode::HelloHmacFailed);
            return Ok(());
        }
        if !self.verify_peer_macs(cb)? {
            return Ok(());
        }
        if commit.zid != peer_zid {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::HelloComponentsMismatch));
        }

        if self.state == ProtocolState::CommitSent {
            let Some(ours) = &self.ex.own_commit else {
                return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
            };
            let our_mult = ours.negotiated.key_agreement == KeyAgreement::Mult;
            let their_mult = commit.negotiated.key_agreement == KeyAgreement::Mult;
            let we_win = match (our_mult, their_mult) {
                (false, true) => true,
                (true, false) => false,
                _ => ours.value.as_bytes() > commit.value.as_bytes(),
            };
            if we_win {
                sink_debug!(self.logger, "[ZRTP] Commit contention won");
                return Ok(());
            }
            sink_debug!(self.logger, "[ZRTP] Commit contention lost, becoming responder");
            self.ex.own_commit = None;
            self.ex.own_commit_bytes.clear();
            self.ex.own_dh_bytes.clear();
            self.ex.dh_secret = None;
        }
        self.cancel_retry(cb);
        self.accept_commit(commit, raw, cb)
    }

    fn check_offered(&self, n: &Negotiated) -> Result<(), ZrtpCoreError> {
        let ours = &self.config.algorithms;
        let fail = |code| Err(ZrtpCoreError::Protocol(code));
        if !ours.hashes.contains(&n.hash) {
            return fail(ZrtpErrorCode::UnsupportedHash);
        }
        if !ours.ciphers.contains(&n.cipher) {
            return fail(ZrtpErrorCode::UnsupportedCipher);
        }
        if !ours.auth_tags.contains(&n.auth_tag) {
            return fail(ZrtpErrorCode::UnsupportedSrtpAuth);
        }
        if !ours.key_agreements.contains(&n.key_agreement) {
            return fail(ZrtpErrorCode::UnsupportedKeyAgreement);
        }
        if !ours.sas_types.contains(&n.sas) {
            return fail(ZrtpErrorCode::UnsupportedSas);
        }
        Ok(())
    }

    fn accept_commit(&mut self, commit: Commit, raw: &[u8], cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        let negotiated = commit.negotiated;
        self.check_offered(&negotiated)?;
        self.ex.role = Some(Role::Responder);
        self.ex.negotiated = Some(negotiated);
        self.ex.peer_commit = Some(commit);
        self.ex.peer_commit_bytes = raw.to_vec();
        cb.send_info(MessageSeverity::Info, MessageCode::RespCommitReceived);

        match negotiated.key_agreement {
            KeyAgreement::Mult => {
                let Some(session_key) = self.multi_stream_key else {
                    return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::UnsupportedKeyAgreement));
                };
                let total_hash = sha256(&[&self.hello_bytes, raw]);
                let zid_i = self.peer_zid_or_err()?;
                let zid_r = self.own_zid;
                self.derive_multi_stream(session_key, &zid_i, &zid_r, &total_hash)?;
                let confirm1 = self.build_confirm(true)?;
                self.send_reply(raw, confirm1, cb);
                self.state = ProtocolState::WaitConfirm2;
            }
            KeyAgreement::X255 => {
                let secret = StaticSecret::random_from_rng(OsRng);
                let public = PublicKey::from(&secret);
                let part1 = self.build_dh_part(Role::Responder, public.to_bytes())?;
                let bytes = part1.encode(true, self.chain.h0())?;
                self.ex.dh_secret = Some(secret);
                self.ex.own_dh_bytes = bytes.clone();
                self.send_reply(raw, bytes, cb);
                self.state = ProtocolState::WaitDhPart2;
            }
        }
        Ok(())
    }

    fn on_dh_part1(&mut self, part: DhPart, raw: &[u8], cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        if self.state != ProtocolState::CommitSent {
            return Ok(());
        }
        let Some(negotiated) = self.ex.negotiated else {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
        };
        if negotiated.key_agreement == KeyAgreement::Mult {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::MalformedPacket));
        }
        if !self.ex.peer_chain.reveal(1, part.h1) {
            cb.send_info(MessageSeverity::Severe, MessageCode::DhPart1HmacFailed);
            return Ok(());
        }
        if !self.verify_peer_macs(cb)? {
            return Ok(());
        }
        self.cancel_retry(cb);
        self.ex.role = Some(Role::Initiator);
        self.ex.peer_dh_bytes = raw.to_vec();
        cb.send_info(MessageSeverity::Info, MessageCode::DhPart1Received);

        let dh_result = self.dh_result(&part.pv)?;
        let (s1, s2) = self.select_shared_secrets(&part, Role::Responder, cb)?;
        let total_hash = sha256(&[
            &self.ex.peer_hello_bytes,
            &self.ex.own_commit_bytes,
            raw,
            &self.ex.own_dh_bytes,
        ]);
        let zid_i = self.own_zid;
        let zid_r = self.peer_zid_or_err()?;
        let s0 = compute_s0(
            &dh_result,
            &zid_i,
            &zid_r,
            &total_hash,
            s1.as_ref().map(|s| s.as_slice()),
            s2.as_deref(),
            None,
        );
        self.keys = Some(KeySchedule::derive(s0, &zid_i, &zid_r, &total_hash, negotiated, None)?);
        self.compute_sas();

        self.state = ProtocolState::WaitConfirm1;
        let part2 = self.ex.own_dh_bytes.clone();
        let policy = self.config.t2;
        self.send_with_retry(part2, policy, cb);
        Ok(())
    }

    fn on_dh_part2(&mut self, part: DhPart, raw: &[u8], cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        if self.state != ProtocolState::WaitDhPart2 {
            return Ok(());
        }
        if !self.ex.peer_chain.reveal(1, part.h1) {
            cb.send_info(MessageSeverity::Severe, MessageCode::DhPart2HmacFailed);
            return Ok(());
        }
        if !self.verify_peer_macs(cb)? {
            return Ok(());
        }
        let (Some(commit), Some(negotiated)) = (&self.ex.peer_commit, self.ex.negotiated) else {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
        };
        let CommitValue::Hvi(hvi) = commit.value else {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::MalformedPacket));
        };
        if sha256(&[raw, &self.hello_bytes]) != hvi {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::DhHviMismatch));
        }
        self.ex.peer_dh_bytes = raw.to_vec();
        cb.send_info(MessageSeverity::Info, MessageCode::DhPart2Received);

        let dh_result = self.dh_result(&part.pv)?;
        let (s1, s2) = self.select_shared_secrets(&part, Role::Initiator, cb)?;
        let total_hash = sha256(&[
            &self.hello_bytes,
            &self.ex.peer_commit_bytes,
            &self.ex.own_dh_bytes,
            raw,
        ]);
        let zid_i = self.peer_zid_or_err()?;
        let zid_r = self.own_zid;
        let s0 = compute_s0(
            &dh_result,
            &zid_i,
            &zid_r,
            &total_hash,
            s1.as_ref().map(|s| s.as_slice()),
            s2.as_deref(),
            None,
        );
        self.keys = Some(KeySchedule::derive(s0, &zid_i, &zid_r, &total_hash, negotiated, None)?);
        self.compute_sas();

        let confirm1 = self.build_confirm(true)?;
        self.send_reply(raw, confirm1, cb);
        self.state = ProtocolState::WaitConfirm2;
        Ok(())
    }

    fn on_confirm1(&mut self, confirm: &Confirm, cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        let multi = self.ex.negotiated.map(|n| n.key_agreement) == Some(KeyAgreement::Mult);
        match (self.state, multi) {
            (ProtocolState::WaitConfirm1, false) => {}
            (ProtocolState::CommitSent, true) => {
                let Some(session_key) = self.multi_stream_key else {
                    return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
                };
                let total_hash = sha256(&[&self.ex.peer_hello_bytes, &self.ex.own_commit_bytes]);
                let zid_i = self.own_zid;
                let zid_r = self.peer_zid_or_err()?;
                self.derive_multi_stream(session_key, &zid_i, &zid_r, &total_hash)?;
                self.ex.role = Some(Role::Initiator);
            }
            _ => return Ok(()),
        }

        let Some(body) = self.open_confirm(confirm, Role::Responder)? else {
            cb.send_info(MessageSeverity::Severe, MessageCode::ConfirmMacFailed);
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::ConfirmMacWrong));
        };
        if !self.ex.peer_chain.reveal(0, body.h0) {
            cb.send_info(MessageSeverity::Severe, MessageCode::DhPart1HmacFailed);
            return Ok(());
        }
        if !self.verify_peer_macs(cb)? {
            return Ok(());
        }
        self.cancel_retry(cb);
        self.ex.peer_allows_clear = body.allow_clear;
        cb.send_info(MessageSeverity::Info, MessageCode::Confirm1Received);

        if !self.install(Role::Initiator, Direction::Receiver, cb) {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
        }
        let confirm2 = self.build_confirm(false)?;
        self.state = ProtocolState::WaitConfAck;
        let policy = self.config.t2;
        self.send_with_retry(confirm2, policy, cb);
        Ok(())
    }

    fn on_confirm2(&mut self, confirm: &Confirm, raw: &[u8], cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        if self.state != ProtocolState::WaitConfirm2 {
            return Ok(());
        }
        let Some(body) = self.open_confirm(confirm, Role::Initiator)? else {
            cb.send_info(MessageSeverity::Severe, MessageCode::ConfirmMacFailed);
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::ConfirmMacWrong));
        };
        if !self.ex.peer_chain.reveal(0, body.h0) {
            cb.send_info(MessageSeverity::Severe, MessageCode::DhPart2HmacFailed);
            return Ok(());
        }
        if !self.verify_peer_macs(cb)? {
            return Ok(());
        }
        self.ex.peer_allows_clear = body.allow_clear;
        cb.send_info(MessageSeverity::Info, MessageCode::Confirm2Received);

        if !self.install(Role::Responder, Direction::Receiver, cb)
            || !self.install(Role::Responder, Direction::Sender, cb)
        {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
        }
        self.send_reply(raw, encode_ack(TYPE_CONF2_ACK), cb);
        self.enter_secure(cb);
        Ok(())
    }

    fn on_conf2_ack(&mut self, cb: &dyn ZrtpCallback) -> Result<(), ZrtpCoreError> {
        if self.state != ProtocolState::WaitConfAck {
            return Ok(());
        }
        self.cancel_retry(cb);
        if !self.install(Role::Initiator, Direction::Sender, cb) {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
        }
        self.enter_secure(cb);
        Ok(())
    }

    fn on_error(&mut self, code: ZrtpErrorCode, cb: &dyn ZrtpCallback) {
        self.send(&encode_ack(TYPE_ERROR_ACK), cb);
        match self.state {
            ProtocolState::Initial | ProtocolState::Secure | ProtocolState::Clear => {
                sink_debug!(self.logger, "[ZRTP] Error {} ignored in {:?}", code, self.state);
            }
            ProtocolState::WaitErrorAck => {
                self.cancel_retry(cb);
                self.state = ProtocolState::Initial;
            }
            _ => {
                sink_warn!(self.logger, "[ZRTP] peer sent Error {}", code);
                self.cancel_retry(cb);
                self.secrets_off(cb);
                self.keys = None;
                self.state = ProtocolState::Initial;
                cb.negotiation_failed(MessageSeverity::Error, MessageCode::Zrtp(code));
            }
        }
    }

    fn on_go_clear(
        &mut self,
        clear_mac: &[u8; MAC_LEN],
        raw: &[u8],
        cb: &dyn ZrtpCallback,
    ) -> Result<(), ZrtpCoreError> {
        if self.state != ProtocolState::Secure || self.go_clear_pending {
            return Ok(());
        }
        if !self.config.allow_clear {
            cb.send_info(MessageSeverity::Warning, MessageCode::GoClearRejected);
            return Ok(());
        }
        let (Some(keys), Some(role)) = (&self.keys, self.ex.role) else {
            return Ok(());
        };
        let peer_role = match role {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        };
        let (peer_mac_key, _) = keys.sending_keys(peer_role);
        if !constant_time_eq(&mac8(peer_mac_key, GO_CLEAR_LABEL)?, clear_mac) {
            cb.send_info(MessageSeverity::Warning, MessageCode::GoClearRejected);
            return Ok(());
        }
        sink_info!(self.logger, "[ZRTP] peer asks to go clear");
        self.ex.reply_to = raw.to_vec();
        self.ex.reply.clear();
        self.go_clear_pending = true;
        cb.handle_go_clear();
        Ok(())
    }

    fn on_clear_ack(&mut self, cb: &dyn ZrtpCallback) {
        if self.state != ProtocolState::WaitClearAck {
            return;
        }
        self.cancel_retry(cb);
        self.go_clear(cb);
    }

    fn go_clear(&mut self, cb: &dyn ZrtpCallback) {
        self.secrets_off(cb);
        self.state = ProtocolState::Clear;
        sink_info!(self.logger, "[ZRTP] media is now in clear");
        cb.send_info(MessageSeverity::Info, MessageCode::SecureStateOff);
    }

    // ------------------------------------------------------------------
    // Key material
    // ------------------------------------------------------------------

    fn peer_zid_or_err(&self) -> Result<Zid, ZrtpCoreError> {
        self.ex
            .peer_hello
            .as_ref()
            .map(|h| h.zid)
            .ok_or(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError))
    }

    fn dh_result(&self, pv: &[u8; 32]) -> Result<[u8; 32], ZrtpCoreError> {
        let secret = self
            .ex
            .dh_secret
            .as_ref()
            .ok_or(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError))?;
        let shared = secret.diffie_hellman(&PublicKey::from(*pv));
        if !shared.was_contributory() {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::DhBadPublicValue));
        }
        Ok(*shared.as_bytes())
    }

    /// Finds s1 (a retained secret whose ID the peer sent) and s2 (the aux
    /// secret if the peer holds the same one). `peer_role` is the label the
    /// peer used for its IDs.
    #[allow(clippy::type_complexity)]
    fn select_shared_secrets(
        &mut self,
        part: &DhPart,
        peer_role: Role,
        cb: &dyn ZrtpCallback,
    ) -> Result<(Option<[u8; 32]>, Option<Vec<u8>>), ZrtpCoreError> {
        let label = role_label(peer_role).as_bytes();
        let mut s1 = None;
        let mut had_secret = false;
        if let Some(record) = &self.ex.record {
            for rs in [record.rs1, record.rs2].into_iter().flatten() {
                had_secret = true;
                let id = mac8(&rs, label)?;
                if id == part.rs1_id || id == part.rs2_id {
                    s1 = Some(rs);
                    break;
                }
            }
        }
        self.ex.rs_matched = s1.is_some();
        if had_secret && s1.is_none() {
            sink_warn!(self.logger, "[ZRTP] no retained secret matches the peer's");
            cb.send_info(MessageSeverity::Warning, MessageCode::NoRsMatch);
        }

        let mut s2 = None;
        if let Some(aux) = &self.aux_secret {
            let peer_h3 = self
                .ex
                .peer_chain
                .get(3)
                .ok_or(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError))?;
            if mac8(aux, peer_h3)? == part.aux_id {
                s2 = Some(aux.clone());
            } else {
                cb.send_info(MessageSeverity::Warning, MessageCode::NoExpectedAuxMatch);
            }
        }
        Ok((s1, s2))
    }

    fn derive_multi_stream(
        &mut self,
        session_key: [u8; 32],
        zid_i: &Zid,
        zid_r: &Zid,
        total_hash: &[u8; 32],
    ) -> Result<(), ZrtpCoreError> {
        let negotiated = self
            .ex
            .negotiated
            .ok_or(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError))?;
        let mut ctx = Vec::with_capacity(56);
        ctx.extend_from_slice(zid_i);
        ctx.extend_from_slice(zid_r);
        ctx.extend_from_slice(total_hash);
        let s0 = kdf32(&session_key, LABEL_MSK, &ctx)?;
        self.keys = Some(KeySchedule::derive(
            s0,
            zid_i,
            zid_r,
            total_hash,
            negotiated,
            Some(session_key),
        )?);
        self.sas = None;
        self.sas_verified = false;
        Ok(())
    }

    fn compute_sas(&mut self) {
        if let Some(keys) = &self.keys {
            self.sas = Some(render_b32(&keys.sas_hash));
        }
        let cached = self.ex.record.as_ref().is_some_and(|r| r.sas_verified);
        self.sas_verified = self.ex.rs_matched && cached;
    }

    /// Confirm1 always comes from the responder, Confirm2 from the initiator.
    fn build_confirm(&self, first: bool) -> Result<Vec<u8>, ZrtpCoreError> {
        let Some(keys) = &self.keys else {
            return Err(ZrtpCoreError::Protocol(ZrtpErrorCode::CriticalSoftwareError));
        };
        let role = if first { Role::Responder } else { Role::Initiator };
        let (mac_key, zrtp_key) = keys.sending_keys(role);
        let body = ConfirmBody {
            h0: *self.chain.h0(),
            enrollment: false,
            sas_verified: self.sas_verified,
            allow_clear: self.config.allow_clear,
            disclosure: false,
            cache_expiry: self.config.cache_expiry,
        };
        let iv = random_bytes::<CONFIRM_IV_LEN>();
        let mut encrypted = body.to_bytes();
        cfb_encrypt(zrtp_key, &iv, &mut encrypted)?;
        let confirm = Confirm {
            confirm_mac: mac8(mac_key, &encrypted)?,
            iv,
            encrypted,
        };
        Ok(confirm.encode(first))
    }

    fn open_confirm(&self, confirm: &Confirm, sender: Role) -> Result<Option<ConfirmBody>, ZrtpCoreError> {
        let Some(keys) = &self.keys else {
            return Ok(None);
        };
        let (mac_key, zrtp_key) = keys.sending_keys(sender);
        if !constant_time_eq(&mac8(mac_key, &confirm.encrypted)?, &confirm.confirm_mac) {
            return Ok(None);
        }
        let mut plain = confirm.encrypted;
        cfb_decrypt(zrtp_key, &confirm.iv, &mut plain)?;
        Ok(Some(ConfirmBody::from_bytes(&plain)))
    }

    /// Verifies every peer message whose MAC key has become known since the
    /// last call. A failure is reported and the triggering message dropped.
    fn verify_peer_macs(&mut self, cb: &dyn ZrtpCallback) -> Result<bool, ZrtpCoreError> {
        let ex = &mut self.ex;
        let dh_code = match ex.role {
            Some(Role::Initiator) => MessageCode::DhPart1HmacFailed,
            _ => MessageCode::DhPart2HmacFailed,
        };
        let pending = [
            (ex.hello_verified, 2, &ex.peer_hello_bytes, MessageCode::HelloHmacFailed),
            (ex.commit_verified, 1, &ex.peer_commit_bytes, MessageCode::CommitHmacFailed),
            (ex.dh_verified, 0, &ex.peer_dh_bytes, dh_code),
        ];
        let mut verified = [false; 3];
        for (i, (done, level, bytes, code)) in pending.into_iter().enumerate() {
            if done || bytes.is_empty() {
                verified[i] = done;
                continue;
            }
            let Some(key) = ex.peer_chain.get(level) else {
                continue;
            };
            if !verify_trailing_mac(key, bytes)? {
                cb.send_info(MessageSeverity::Severe, code);
                return Ok(false);
            }
            verified[i] = true;
        }
        ex.hello_verified = verified[0];
        ex.commit_verified = verified[1];
        ex.dh_verified = verified[2];
        Ok(true)
    }

    fn install(&mut self, role: Role, direction: Direction, cb: &dyn ZrtpCallback) -> bool {
        let Some(keys) = &self.keys else {
            return false;
        };
        let secrets = keys.srtp_secrets(role);
        if !cb.srtp_secrets_ready(&secrets, direction) {
            cb.send_info(MessageSeverity::Severe, MessageCode::SrtpSecretsFailed);
            return false;
        }
        self.installed[direction_index(direction)] = true;
        true
    }

    fn enter_secure(&mut self, cb: &dyn ZrtpCallback) {
        self.state = ProtocolState::Secure;
        let Some((negotiated, new_rs1)) = self.keys.as_ref().map(|k| (k.negotiated, k.new_rs1)) else {
            return;
        };
        if negotiated.key_agreement != KeyAgreement::Mult {
            self.store_retained_secret(new_rs1);
        }
        let cipher = negotiated.cipher_name();
        sink_info!(
            self.logger,
            "[ZRTP] secure: {} as {:?}, SAS verified={}",
            cipher,
            self.ex.role,
            self.sas_verified
        );
        cb.srtp_secrets_on(&cipher, self.sas.as_deref(), self.sas_verified);
        cb.send_info(MessageSeverity::Info, MessageCode::SecureStateOn);
    }

    fn store_retained_secret(&mut self, new_rs1: [u8; 32]) {
        let Some(peer_zid) = self.ex.peer_hello.as_ref().map(|h| h.zid) else {
            return;
        };
        let mut record = self.ex.record.take().unwrap_or_else(|| ZidRecord::new(peer_zid));
        if !self.ex.rs_matched {
            record.sas_verified = false;
        }
        record.set_new_rs1(new_rs1, now_secs());
        if let Err(e) = self.store.save_record(record.clone()) {
            sink_warn!(self.logger, "[ZRTP] could not save retained secret: {e}");
        }
        self.ex.record = Some(record);
    }

    fn update_verified(&mut self, verified: bool) {
        self.sas_verified = verified;
        let Some(record) = self.ex.record.as_mut() else {
            return;
        };
        record.sas_verified = verified;
        if let Err(e) = self.store.save_record(record.clone()) {
            sink_warn!(self.logger, "[ZRTP] could not save SAS flag: {e}");
        }
    }
}

impl ZrtpProtocolEngine for ZrtpCore {
    fn start(&mut self, cb: &dyn ZrtpCallback) {
        if self.state != ProtocolState::Initial {
            return;
        }
        self.ex = Exchange::default();
        self.keys = None;
        self.sas = None;
        self.sas_verified = false;
        self.go_clear_pending = false;
        self.state = ProtocolState::Detect;
        sink_info!(self.logger, "[ZRTP] started, sending Hello");
        let hello = self.hello_bytes.clone();
        let policy = self.config.t1;
        self.send_with_retry(hello, policy, cb);
    }

    fn stop(&mut self, cb: &dyn ZrtpCallback) {
        self.cancel_retry(cb);
        self.secrets_off(cb);
        self.keys = None;
        self.ex = Exchange::default();
        self.go_clear_pending = false;
        self.state = ProtocolState::Initial;
        sink_debug!(self.logger, "[ZRTP] stopped");
    }

    fn process_message(&mut self, message: &[u8], peer_ssrc: u32, cb: &dyn ZrtpCallback) {
        if self.state == ProtocolState::Initial {
            return;
        }
        self.peer_ssrc = peer_ssrc;

        if !self.ex.reply_to.is_empty() && self.ex.reply_to == message {
            if !self.ex.reply.is_empty() {
                sink_trace!(self.logger, "[ZRTP] retransmission, repeating reply");
                self.send(&self.ex.reply, cb);
            }
            return;
        }

        let decoded = match ZrtpMessage::decode(message) {
            Ok(m) => m,
            Err(ZrtpCoreError::Protocol(code)) => {
                self.fail(code, cb);
                return;
            }
            Err(e) => {
                sink_warn!(self.logger, "[ZRTP] dropping message: {e}");
                return;
            }
        };
        sink_debug!(self.logger, "[ZRTP] {} in {:?}", decoded.name(), self.state);
        if let Err(e) = self.dispatch(decoded, message, cb) {
            self.fail(e.wire_code(), cb);
        }
    }

    fn process_timeout(&mut self, cb: &dyn ZrtpCallback) {
        let Some(retry) = self.retry.as_mut() else {
            return;
        };
        retry.count += 1;
        if retry.count > retry.policy.max_retries {
            self.retry = None;
            self.retries_exhausted(cb);
            return;
        }
        retry.delay = retry.policy.next_delay(retry.delay);
        let delay = retry.delay;
        let message = retry.message.clone();
        sink_trace!(self.logger, "[ZRTP] resend in {:?}, next in {:?}", self.state, delay);
        self.send(&message, cb);
        cb.activate_timer(delay);
    }

    fn state(&self) -> ProtocolState {
        self.state
    }

    fn conf2_ack_secure(&mut self, cb: &dyn ZrtpCallback) {
        if let Err(e) = self.on_conf2_ack(cb) {
            self.fail(e.wire_code(), cb);
        }
    }

    fn sas_verified(&mut self) {
        self.update_verified(true);
    }

    fn reset_sas_verified(&mut self) {
        self.update_verified(false);
    }

    fn hello_hash(&self) -> String {
        let (version, hash) = self.hello_hash_parts();
        format!("{version} {hash}")
    }

    fn hello_hash_parts(&self) -> (String, String) {
        (
            String::from_utf8_lossy(ZRTP_VERSION).into_owned(),
            hex::encode(sha256(&[&self.hello_bytes])),
        )
    }

    fn peer_zid(&self) -> Option<[u8; 12]> {
        self.ex.peer_hello.as_ref().map(|h| h.zid)
    }

    fn set_aux_secret(&mut self, secret: &[u8]) {
        self.aux_secret = if secret.is_empty() {
            None
        } else {
            Some(secret.to_vec())
        };
    }

    fn request_go_clear(&mut self, cb: &dyn ZrtpCallback) -> bool {
        if self.state != ProtocolState::Secure || !self.config.allow_clear || !self.ex.peer_allows_clear {
            return false;
        }
        let (Some(keys), Some(role)) = (&self.keys, self.ex.role) else {
            return false;
        };
        let (mac_key, _) = keys.sending_keys(role);
        let clear_mac = match mac8(mac_key, GO_CLEAR_LABEL) {
            Ok(m) => m,
            Err(e) => {
                sink_warn!(self.logger, "[ZRTP] GoClear MAC failed: {e}");
                return false;
            }
        };
        sink_info!(self.logger, "[ZRTP] requesting GoClear");
        self.state = ProtocolState::WaitClearAck;
        let policy = self.config.t2;
        self.send_with_retry(encode_go_clear(&clear_mac), policy, cb);
        true
    }

    fn accept_go_clear(&mut self, cb: &dyn ZrtpCallback) -> bool {
        if self.state != ProtocolState::Secure || !self.go_clear_pending {
            return false;
        }
        self.go_clear_pending = false;
        let trigger = std::mem::take(&mut self.ex.reply_to);
        self.send_reply(&trigger, encode_ack(TYPE_CLEAR_ACK), cb);
        self.go_clear(cb);
        true
    }

    fn multi_stream_params(&self) -> Option<MultiStreamParams> {
        if self.state != ProtocolState::Secure {
            return None;
        }
        self.keys
            .as_ref()
            .map(|k| MultiStreamParams::from_bytes(&k.session_key))
    }

    fn set_multi_stream_params(&mut self, params: &MultiStreamParams) {
        match <[u8; 32]>::try_from(params.as_bytes()) {
            Ok(key) => self.multi_stream_key = Some(key),
            Err(_) => {
                sink_warn!(
                    self.logger,
                    "[ZRTP] ignoring multi-stream parameters of {} bytes",
                    params.as_bytes().len()
                );
            }
        }
    }

    fn is_multi_stream(&self) -> bool {
        self.multi_stream_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;
    use crate::protocol::SrtpSecrets;
    use crate::zrtp_core::messages::{TYPE_COMMIT, TYPE_GO_CLEAR, message_type};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        outbox: Mutex<VecDeque<Vec<u8>>>,
        secrets: Mutex<Vec<(Direction, SrtpSecrets)>>,
        secure_on: Mutex<Option<(String, Option<String>, bool)>>,
        secrets_off: Mutex<Vec<Direction>>,
        infos: Mutex<Vec<(MessageSeverity, MessageCode)>>,
        failures: Mutex<Vec<(MessageSeverity, MessageCode)>>,
        timer: Mutex<Option<Duration>>,
        not_supported: AtomicUsize,
        go_clear: AtomicUsize,
    }

    impl Recorder {
        fn drain(&self) -> Vec<Vec<u8>> {
            self.outbox.lock().unwrap().drain(..).collect()
        }

        fn sent_types(&self) -> Vec<Vec<u8>> {
            self.outbox
                .lock()
                .unwrap()
                .iter()
                .map(|m| message_type(m).unwrap().to_vec())
                .collect()
        }

        fn has_info(&self, code: MessageCode) -> bool {
            self.infos.lock().unwrap().iter().any(|(_, c)| *c == code)
        }
    }

    impl ZrtpCallback for Recorder {
        fn send_data_zrtp(&self, message: &[u8]) -> bool {
            self.outbox.lock().unwrap().push_back(message.to_vec());
            true
        }

        fn srtp_secrets_ready(&self, secrets: &SrtpSecrets, direction: Direction) -> bool {
            self.secrets.lock().unwrap().push((direction, secrets.clone()));
            true
        }

        fn srtp_secrets_on(&self, cipher: &str, sas: Option<&str>, verified: bool) {
            *self.secure_on.lock().unwrap() =
                Some((cipher.to_string(), sas.map(str::to_string), verified));
        }

        fn srtp_secrets_off(&self, direction: Direction) {
            self.secrets_off.lock().unwrap().push(direction);
        }

        fn activate_timer(&self, delay: Duration) {
            *self.timer.lock().unwrap() = Some(delay);
        }

        fn cancel_timer(&self) {
            *self.timer.lock().unwrap() = None;
        }

        fn send_info(&self, severity: MessageSeverity, code: MessageCode) {
            self.infos.lock().unwrap().push((severity, code));
        }

        fn negotiation_failed(&self, severity: MessageSeverity, code: MessageCode) {
            self.failures.lock().unwrap().push((severity, code));
        }

        fn not_supported_by_other(&self) {
            self.not_supported.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_go_clear(&self) {
            self.go_clear.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(allow_clear: bool) -> ZrtpConfig {
        let mut cfg = ZrtpConfig::standard();
        cfg.allow_clear = allow_clear;
        cfg
    }

    fn core_with(store: &Arc<ZidStore>, cfg: ZrtpConfig) -> ZrtpCore {
        ZrtpCore::new(Arc::new(NoopLogSink), cfg, Arc::clone(store)).unwrap()
    }

    /// Delivers queued messages both ways until both outboxes are empty.
    /// Messages whose type equals `drop` are lost on the wire.
    fn pump(
        a: &mut ZrtpCore,
        ra: &Recorder,
        b: &mut ZrtpCore,
        rb: &Recorder,
        drop: Option<&[u8; 8]>,
    ) {
        let keep = |m: &Vec<u8>| drop.is_none_or(|t| message_type(m) != Some(t.as_slice()));
        for _ in 0..64 {
            let from_a = ra.drain();
            let from_b = rb.drain();
            if from_a.is_empty() && from_b.is_empty() {
                return;
            }
            for m in from_a.iter().filter(|m| keep(m)) {
                b.process_message(m, 0xA, rb);
            }
            for m in from_b.iter().filter(|m| keep(m)) {
                a.process_message(m, 0xB, ra);
            }
        }
        panic!("exchange did not settle");
    }

    struct Pair {
        a: ZrtpCore,
        ra: Recorder,
        b: ZrtpCore,
        rb: Recorder,
    }

    fn handshake(store_a: &Arc<ZidStore>, store_b: &Arc<ZidStore>, allow_clear: bool) -> Pair {
        let mut p = Pair {
            a: core_with(store_a, config(allow_clear)),
            ra: Recorder::default(),
            b: core_with(store_b, config(allow_clear)),
            rb: Recorder::default(),
        };
        p.a.start(&p.ra);
        p.b.start(&p.rb);
        pump(&mut p.a, &p.ra, &mut p.b, &p.rb, None);
        p
    }

    fn stores() -> (Arc<ZidStore>, Arc<ZidStore>) {
        (Arc::new(ZidStore::in_memory()), Arc::new(ZidStore::in_memory()))
    }

    #[test]
    fn dh_exchange_reaches_secure_with_matching_sas_and_keys() {
        let (sa, sb) = stores();
        let p = handshake(&sa, &sb, false);
        assert_eq!(p.a.state(), ProtocolState::Secure);
        assert_eq!(p.b.state(), ProtocolState::Secure);

        let sas_a = p.a.sas().unwrap().to_string();
        assert_eq!(sas_a.len(), 4);
        assert_eq!(Some(sas_a.as_str()), p.b.sas());
        assert_ne!(p.a.role(), p.b.role());

        let on_a = p.ra.secure_on.lock().unwrap().clone().unwrap();
        let on_b = p.rb.secure_on.lock().unwrap().clone().unwrap();
        assert_eq!(on_a.0, "AES-CM-256/HS80");
        assert_eq!(on_a, on_b);
        assert!(!on_a.2);

        let secrets_a = p.ra.secrets.lock().unwrap();
        let secrets_b = p.rb.secrets.lock().unwrap();
        assert_eq!(secrets_a.len(), 2);
        assert_eq!(secrets_b.len(), 2);
        assert_eq!(secrets_a[0].1.key_initiator, secrets_b[0].1.key_initiator);
        assert_eq!(secrets_a[0].1.salt_responder, secrets_b[0].1.salt_responder);
        assert_ne!(secrets_a[0].1.key_initiator, secrets_a[0].1.key_responder);
        assert!(p.ra.has_info(MessageCode::SecureStateOn));
        assert!(p.rb.has_info(MessageCode::SecureStateOn));
        assert!(p.ra.failures.lock().unwrap().is_empty());
        assert_eq!(p.a.peer_zid(), Some(sb.own_zid()));
    }

    #[test]
    fn retained_secrets_carry_the_verified_flag_to_the_next_call() {
        let (sa, sb) = stores();
        let mut first = handshake(&sa, &sb, false);
        assert_eq!(sa.len(), 1);
        first.a.sas_verified();
        first.b.sas_verified();

        let second = handshake(&sa, &sb, false);
        assert_eq!(second.a.state(), ProtocolState::Secure);
        assert!(!second.ra.has_info(MessageCode::NoRsMatch));
        let on = second.ra.secure_on.lock().unwrap().clone().unwrap();
        assert!(on.2, "SAS should come back verified");
        assert_ne!(first.a.sas(), None);
    }

    #[test]
    fn lost_cache_on_one_side_warns_and_resets_verified() {
        let (sa, sb) = stores();
        let mut first = handshake(&sa, &sb, false);
        first.a.sas_verified();

        sb.save_record(ZidRecord::new(sa.own_zid())).unwrap();
        let second = handshake(&sa, &sb, false);
        assert_eq!(second.a.state(), ProtocolState::Secure);
        assert!(second.ra.has_info(MessageCode::NoRsMatch));
        let on = second.ra.secure_on.lock().unwrap().clone().unwrap();
        assert!(!on.2);
    }

    #[test]
    fn multi_stream_session_skips_dh_and_sas() {
        let (sa, sb) = stores();
        let master = handshake(&sa, &sb, false);
        let params_a = master.a.multi_stream_params().unwrap();
        let params_b = master.b.multi_stream_params().unwrap();
        assert_eq!(params_a, params_b);

        let mut p = Pair {
            a: core_with(&sa, config(false)),
            ra: Recorder::default(),
            b: core_with(&sb, config(false)),
            rb: Recorder::default(),
        };
        p.a.set_multi_stream_params(&params_a);
        p.b.set_multi_stream_params(&params_b);
        assert!(p.a.is_multi_stream());
        p.a.start(&p.ra);
        p.b.start(&p.rb);
        pump(&mut p.a, &p.ra, &mut p.b, &p.rb, None);

        assert_eq!(p.a.state(), ProtocolState::Secure);
        assert_eq!(p.b.state(), ProtocolState::Secure);
        assert_eq!(p.a.sas(), None);
        let on = p.rb.secure_on.lock().unwrap().clone().unwrap();
        assert_eq!(on.1, None);
        let ka = p.ra.secrets.lock().unwrap()[0].1.key_initiator.clone();
        let kb = p.rb.secrets.lock().unwrap()[0].1.key_initiator.clone();
        assert_eq!(ka, kb);
        let master_key = master.ra.secrets.lock().unwrap()[0].1.key_initiator.clone();
        assert_ne!(ka, master_key);
    }

    #[test]
    fn implicit_conf2_ack_completes_the_initiator() {
        let (sa, sb) = stores();
        let mut p = Pair {
            a: core_with(&sa, config(false)),
            ra: Recorder::default(),
            b: core_with(&sb, config(false)),
            rb: Recorder::default(),
        };
        p.a.start(&p.ra);
        p.b.start(&p.rb);
        pump(&mut p.a, &p.ra, &mut p.b, &p.rb, Some(TYPE_CONF2_ACK));

        let (initiator, cb) = if p.a.role() == Some(Role::Initiator) {
            (&mut p.a, &p.ra)
        } else {
            (&mut p.b, &p.rb)
        };
        assert_eq!(initiator.state(), ProtocolState::WaitConfAck);
        initiator.conf2_ack_secure(cb);
        assert_eq!(initiator.state(), ProtocolState::Secure);
        assert!(cb.timer.lock().unwrap().is_none());
    }

    #[test]
    fn retransmitted_commit_gets_the_same_reply() {
        let (sa, sb) = stores();
        let mut p = Pair {
            a: core_with(&sa, config(false)),
            ra: Recorder::default(),
            b: core_with(&sb, config(false)),
            rb: Recorder::default(),
        };
        p.a.start(&p.ra);
        p.b.start(&p.rb);
        // Hello both ways, HelloACK both ways, then both send Commit.
        for _ in 0..2 {
            let from_a = p.ra.drain();
            let from_b = p.rb.drain();
            from_a.iter().for_each(|m| p.b.process_message(m, 1, &p.rb));
            from_b.iter().for_each(|m| p.a.process_message(m, 2, &p.ra));
        }
        let commit_a = p.ra.drain();
        let commit_b = p.rb.drain();
        assert_eq!(message_type(&commit_a[0]), Some(TYPE_COMMIT.as_slice()));
        commit_a.iter().for_each(|m| p.b.process_message(m, 1, &p.rb));
        commit_b.iter().for_each(|m| p.a.process_message(m, 2, &p.ra));

        let (responder, rcb, commit) = if p.a.state() == ProtocolState::WaitDhPart2 {
            (&mut p.a, &p.ra, commit_b[0].clone())
        } else {
            (&mut p.b, &p.rb, commit_a[0].clone())
        };
        assert_eq!(responder.state(), ProtocolState::WaitDhPart2);
        let first = rcb.drain();
        responder.process_message(&commit, 9, rcb);
        assert_eq!(rcb.drain(), first);
    }

    #[test]
    fn silent_peer_is_reported_once_after_hello_budget() {
        let (sa, _) = stores();
        let mut cfg = config(false);
        cfg.t1.max_retries = 3;
        let mut a = core_with(&sa, cfg);
        let ra = Recorder::default();
        a.start(&ra);
        assert_eq!(*ra.timer.lock().unwrap(), Some(Duration::from_millis(50)));
        let mut delays = Vec::new();
        for _ in 0..3 {
            a.process_timeout(&ra);
            delays.push(ra.timer.lock().unwrap().unwrap().as_millis());
        }
        assert_eq!(delays, vec![100, 200, 200]);
        assert_eq!(ra.drain().len(), 4);
        a.process_timeout(&ra);
        assert_eq!(ra.not_supported.load(Ordering::SeqCst), 1);
        assert_eq!(a.state(), ProtocolState::Initial);
        a.process_timeout(&ra);
        assert_eq!(ra.not_supported.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn peer_error_is_acknowledged_and_reported() {
        let (sa, _) = stores();
        let mut a = core_with(&sa, config(false));
        let ra = Recorder::default();
        a.start(&ra);
        ra.drain();
        a.process_message(&encode_error(ZrtpErrorCode::UnsupportedCipher), 1, &ra);
        assert_eq!(ra.sent_types(), vec![TYPE_ERROR_ACK.to_vec()]);
        assert_eq!(
            ra.failures.lock().unwrap().as_slice(),
            &[(MessageSeverity::Error, MessageCode::Zrtp(ZrtpErrorCode::UnsupportedCipher))]
        );
        assert_eq!(a.state(), ProtocolState::Initial);
    }

    #[test]
    fn equal_zid_aborts_with_error() {
        let shared = Arc::new(ZidStore::in_memory());
        let mut a = core_with(&shared, config(false));
        let mut b = core_with(&shared, config(false));
        let (ra, rb) = (Recorder::default(), Recorder::default());
        a.start(&ra);
        b.start(&rb);
        for m in rb.drain() {
            a.process_message(&m, 1, &ra);
        }
        assert_eq!(a.state(), ProtocolState::WaitErrorAck);
        let types = ra.sent_types();
        assert_eq!(types.last().unwrap().as_slice(), b"Error   ");
        assert_eq!(
            ra.failures.lock().unwrap()[0].1,
            MessageCode::Zrtp(ZrtpErrorCode::EqualZid)
        );
    }

    #[test]
    fn go_clear_needs_confirmation_then_turns_both_sides_off() {
        let (sa, sb) = stores();
        let mut p = handshake(&sa, &sb, true);
        assert!(p.a.request_go_clear(&p.ra));
        assert_eq!(p.a.state(), ProtocolState::WaitClearAck);
        assert_eq!(p.ra.sent_types(), vec![TYPE_GO_CLEAR.to_vec()]);
        pump(&mut p.a, &p.ra, &mut p.b, &p.rb, None);
        assert_eq!(p.rb.go_clear.load(Ordering::SeqCst), 1);
        assert_eq!(p.b.state(), ProtocolState::Secure);

        assert!(p.b.accept_go_clear(&p.rb));
        pump(&mut p.a, &p.ra, &mut p.b, &p.rb, None);
        assert_eq!(p.a.state(), ProtocolState::Clear);
        assert_eq!(p.b.state(), ProtocolState::Clear);
        assert_eq!(p.ra.secrets_off.lock().unwrap().len(), 2);
        assert_eq!(p.rb.secrets_off.lock().unwrap().len(), 2);
        assert!(p.ra.has_info(MessageCode::SecureStateOff));
    }

    #[test]
    fn go_clear_refused_when_not_allowed() {
        let (sa, sb) = stores();
        let mut p = handshake(&sa, &sb, false);
        assert!(!p.a.request_go_clear(&p.ra));
        assert!(!p.b.accept_go_clear(&p.rb));
        assert_eq!(p.a.state(), ProtocolState::Secure);
    }

    #[test]
    fn stop_turns_installed_secrets_off() {
        let (sa, sb) = stores();
        let mut p = handshake(&sa, &sb, false);
        p.a.stop(&p.ra);
        assert_eq!(p.a.state(), ProtocolState::Initial);
        assert_eq!(p.ra.secrets_off.lock().unwrap().len(), 2);
        assert!(p.a.multi_stream_params().is_none());
    }

    #[test]
    fn hello_hash_has_version_prefix() {
        let (sa, _) = stores();
        let a = core_with(&sa, config(false));
        let (version, hash) = a.hello_hash_parts();
        assert_eq!(version, "1.10");
        assert_eq!(hash.len(), 64);
        assert_eq!(a.hello_hash(), format!("1.10 {hash}"));
    }
}
