use crate::log::log_sink::LogSink;
use crate::srtp::constants::{SRTP_LABEL_AUTH, SRTP_LABEL_ENCRYPTION, SRTP_LABEL_SALT};
use crate::srtp::replay_window::ReplayWindow;
use crate::srtp::session_keys::SessionKeys;
use crate::srtp::utils::{
    HmacSha1, KeyLabels, aes_ctr_apply, compute_iv, constant_time_eq, derive_session_keys,
    get_rtp_header_len,
};
use crate::srtp::{SrtpEndpointKeys, SrtpError, SrtpPolicy};
use crate::{sink_debug, sink_trace, sink_warn};
use byteorder::{BigEndian, ByteOrder};
use hmac::Mac;
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroize;

const RTP_LABELS: KeyLabels = KeyLabels {
    encryption: SRTP_LABEL_ENCRYPTION,
    auth: SRTP_LABEL_AUTH,
    salt: SRTP_LABEL_SALT,
};

/// One direction of SRTP: either protects outgoing or unprotects incoming
/// packets, tracking rollover counters and replay state per SSRC.
pub struct SrtpContext {
    logger: Arc<dyn LogSink>,
    policy: SrtpPolicy,
    session_keys: SessionKeys,
    rocs: HashMap<u32, u32>,
    last_seqs: HashMap<u32, u16>,
    replay_windows: HashMap<u32, ReplayWindow>,
    closed: bool,
}

impl SrtpContext {
    pub fn new(
        logger: Arc<dyn LogSink>,
        policy: SrtpPolicy,
        master_keys: &SrtpEndpointKeys,
    ) -> Result<Self, SrtpError> {
        let session_keys = derive_session_keys(master_keys, &policy, RTP_LABELS)?;
        sink_debug!(
            logger,
            "[SRTP] context ready: cipher={:?} tag={} bytes",
            policy.cipher,
            policy.auth_tag_len
        );

        Ok(Self {
            logger,
            policy,
            session_keys,
            rocs: HashMap::new(),
            last_seqs: HashMap::new(),
            replay_windows: HashMap::new(),
            closed: false,
        })
    }

    #[must_use]
    pub fn policy(&self) -> SrtpPolicy {
        self.policy
    }

    /// Encrypts the payload in place and appends the authentication tag.
    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if self.closed {
            return Err(SrtpError::Closed);
        }
        let header_len = get_rtp_header_len(packet)?;
        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);
        let roc = self.sender_roc(ssrc, seq);
        let index = (u64::from(roc) << 16) | u64::from(seq);

        let iv = compute_iv(&self.session_keys.salt, ssrc, index);
        aes_ctr_apply(&self.session_keys.enc_key, &iv, &mut packet[header_len..])?;

        let tag = self.auth_tag(packet, roc)?;
        packet.extend_from_slice(&tag[..self.policy.auth_tag_len]);

        sink_trace!(
            self.logger,
            "[SRTP] protected ssrc={:#x} seq={} roc={} len={}",
            ssrc,
            seq,
            roc,
            packet.len()
        );
        Ok(())
    }

    /// Verifies, replay-checks and decrypts in place; the tag is removed.
    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if self.closed {
            return Err(SrtpError::Closed);
        }
        let tag_len = self.policy.auth_tag_len;
        if packet.len() < 12 + tag_len {
            return Err(SrtpError::PacketTooShort(packet.len()));
        }

        let tag_start = packet.len() - tag_len;
        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);
        let roc = self.estimate_roc(ssrc, seq);
        let index = (u64::from(roc) << 16) | u64::from(seq);

        if self
            .replay_windows
            .get(&ssrc)
            .is_some_and(|w| w.is_replay(index))
        {
            sink_warn!(
                self.logger,
                "[SRTP] replay detected: ssrc={:#x} seq={} index={}",
                ssrc,
                seq,
                index
            );
            return Err(SrtpError::Replay { ssrc, index });
        }

        let computed = self.auth_tag(&packet[..tag_start], roc)?;
        if !constant_time_eq(&computed[..tag_len], &packet[tag_start..]) {
            sink_debug!(
                self.logger,
                "[SRTP] auth failed: ssrc={:#x} seq={} roc={}",
                ssrc,
                seq,
                roc
            );
            return Err(SrtpError::AuthFailed { ssrc });
        }

        packet.truncate(tag_start);
        let header_len = get_rtp_header_len(packet)?;
        let iv = compute_iv(&self.session_keys.salt, ssrc, index);
        aes_ctr_apply(&self.session_keys.enc_key, &iv, &mut packet[header_len..])?;

        let highest = self
            .last_seqs
            .get(&ssrc)
            .map(|&s| (u64::from(self.rocs.get(&ssrc).copied().unwrap_or(0)) << 16) | u64::from(s));
        if highest.is_none_or(|h| index > h) {
            self.rocs.insert(ssrc, roc);
            self.last_seqs.insert(ssrc, seq);
        }
        self.replay_windows
            .entry(ssrc)
            .or_insert_with(ReplayWindow::new)
            .record(index);

        sink_trace!(
            self.logger,
            "[SRTP] unprotected ssrc={:#x} seq={}",
            ssrc,
            seq
        );
        Ok(())
    }

    /// Wipes the session keys; every later call fails with [`SrtpError::Closed`].
    pub fn close(&mut self) {
        self.session_keys.zeroize();
        self.rocs.clear();
        self.last_seqs.clear();
        self.replay_windows.clear();
        self.closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub(crate) fn keys_zeroed(&self) -> bool {
        self.session_keys.is_zeroed()
    }

    fn auth_tag(&self, authenticated: &[u8], roc: u32) -> Result<[u8; 20], SrtpError> {
        let mut mac = HmacSha1::new_from_slice(&self.session_keys.auth_key)
            .map_err(|_| SrtpError::InvalidKeyLength(self.session_keys.auth_key.len()))?;
        mac.update(authenticated);
        mac.update(&roc.to_be_bytes());
        let mut tag = [0u8; 20];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    fn sender_roc(&mut self, ssrc: u32, seq: u16) -> u32 {
        let Some(&last_seq) = self.last_seqs.get(&ssrc) else {
            self.last_seqs.insert(ssrc, seq);
            self.rocs.insert(ssrc, 0);
            return 0;
        };
        let mut roc = self.rocs.get(&ssrc).copied().unwrap_or(0);

        // Sequence wrapped if it jumped backwards by more than half the space.
        if seq < last_seq && last_seq - seq > 0x8000 {
            roc = roc.wrapping_add(1);
            self.rocs.insert(ssrc, roc);
            self.last_seqs.insert(ssrc, seq);
        } else if seq > last_seq && seq - last_seq < 0x8000 {
            self.last_seqs.insert(ssrc, seq);
        } else if seq > last_seq {
            // Late packet from before the last wrap.
            return roc.wrapping_sub(1);
        }
        roc
    }

    fn estimate_roc(&self, ssrc: u32, seq: u16) -> u32 {
        let Some(&last_seq) = self.last_seqs.get(&ssrc) else {
            return 0;
        };
        let last_roc = self.rocs.get(&ssrc).copied().unwrap_or(0);
        let delta = i32::from(seq) - i32::from(last_seq);

        if delta <= -32768 {
            return last_roc.wrapping_add(1);
        }
        if delta >= 32768 {
            return last_roc.wrapping_sub(1);
        }
        last_roc
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::log::NoopLogSink;

    fn ctx(policy: SrtpPolicy) -> SrtpContext {
        let keys = SrtpEndpointKeys::new(&vec![7u8; policy.key_len()], &[9u8; 14]);
        SrtpContext::new(Arc::new(NoopLogSink), policy, &keys).unwrap()
    }

    fn rtp(seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x80, 0x00];
        p.extend_from_slice(&seq.to_be_bytes());
        p.extend_from_slice(&[0, 0, 0, 1, 0xCA, 0xFE, 0xBA, 0xBE]);
        p.extend_from_slice(payload);
        p
    }

    #[test]
    fn protect_unprotect_for_each_policy() {
        for policy in [
            SrtpPolicy::AES128_CM_HMAC_SHA1_80,
            SrtpPolicy::AES128_CM_HMAC_SHA1_32,
            SrtpPolicy::AES256_CM_HMAC_SHA1_80,
            SrtpPolicy::AES256_CM_HMAC_SHA1_32,
        ] {
            let mut tx = ctx(policy);
            let mut rx = ctx(policy);
            let plain = rtp(100, b"hello media");
            let mut pkt = plain.clone();
            tx.protect(&mut pkt).unwrap();
            assert_eq!(pkt.len(), plain.len() + policy.auth_tag_len);
            assert_ne!(&pkt[12..23], b"hello media");
            rx.unprotect(&mut pkt).unwrap();
            assert_eq!(pkt, plain);
        }
    }

    #[test]
    fn tampered_packet_fails_auth() {
        let mut tx = ctx(SrtpPolicy::AES128_CM_HMAC_SHA1_80);
        let mut rx = ctx(SrtpPolicy::AES128_CM_HMAC_SHA1_80);
        let mut pkt = rtp(1, b"payload");
        tx.protect(&mut pkt).unwrap();
        pkt[13] ^= 0x01;
        assert!(matches!(rx.unprotect(&mut pkt), Err(SrtpError::AuthFailed { .. })));
    }

    #[test]
    fn replayed_packet_is_rejected() {
        let mut tx = ctx(SrtpPolicy::AES128_CM_HMAC_SHA1_80);
        let mut rx = ctx(SrtpPolicy::AES128_CM_HMAC_SHA1_80);
        let mut pkt = rtp(5, b"once");
        tx.protect(&mut pkt).unwrap();
        let copy = pkt.clone();
        rx.unprotect(&mut pkt).unwrap();
        let mut again = copy;
        assert!(matches!(rx.unprotect(&mut again), Err(SrtpError::Replay { .. })));
    }

    #[test]
    fn rollover_keeps_both_sides_in_step() {
        let mut tx = ctx(SrtpPolicy::AES128_CM_HMAC_SHA1_80);
        let mut rx = ctx(SrtpPolicy::AES128_CM_HMAC_SHA1_80);
        for seq in [65_534u16, 65_535, 0, 1] {
            let plain = rtp(seq, b"wrap");
            let mut pkt = plain.clone();
            tx.protect(&mut pkt).unwrap();
            rx.unprotect(&mut pkt).unwrap();
            assert_eq!(pkt, plain, "seq {seq}");
        }
    }

    #[test]
    fn close_zeroes_keys_and_refuses_work() {
        let mut tx = ctx(SrtpPolicy::AES256_CM_HMAC_SHA1_80);
        tx.close();
        assert!(tx.is_closed());
        assert!(tx.keys_zeroed());
        let mut pkt = rtp(1, b"x");
        assert_eq!(tx.protect(&mut pkt), Err(SrtpError::Closed));
    }
}
