use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use hmac::Mac;
use zeroize::Zeroize;

use crate::log::log_sink::LogSink;
use crate::srtp::constants::{
    RTCP_HEADER_LEN, SRTCP_E_FLAG, SRTCP_INDEX_LEN, SRTCP_INDEX_MASK, SRTCP_LABEL_AUTH,
    SRTCP_LABEL_ENCRYPTION, SRTCP_LABEL_SALT,
};
use crate::srtp::replay_window::ReplayWindow;
use crate::srtp::session_keys::SessionKeys;
use crate::srtp::utils::{
    HmacSha1, KeyLabels, aes_ctr_apply, compute_iv, constant_time_eq, derive_session_keys,
};
use crate::srtp::{SrtpEndpointKeys, SrtpError, SrtpPolicy};
use crate::{sink_trace, sink_warn};

const RTCP_LABELS: KeyLabels = KeyLabels {
    encryption: SRTCP_LABEL_ENCRYPTION,
    auth: SRTCP_LABEL_AUTH,
    salt: SRTCP_LABEL_SALT,
};

/// SRTCP (RFC 3711 §3.4): everything after the first 8 header bytes is
/// encrypted, then `E || index` and the tag are appended.
pub struct SrtcpContext {
    logger: Arc<dyn LogSink>,
    policy: SrtpPolicy,
    session_keys: SessionKeys,
    send_index: u32,
    replay_windows: HashMap<u32, ReplayWindow>,
    closed: bool,
}

impl SrtcpContext {
    pub fn new(
        logger: Arc<dyn LogSink>,
        policy: SrtpPolicy,
        master_keys: &SrtpEndpointKeys,
    ) -> Result<Self, SrtpError> {
        let session_keys = derive_session_keys(master_keys, &policy, RTCP_LABELS)?;
        Ok(Self {
            logger,
            policy,
            session_keys,
            send_index: 0,
            replay_windows: HashMap::new(),
            closed: false,
        })
    }

    pub fn protect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if self.closed {
            return Err(SrtpError::Closed);
        }
        if packet.len() < RTCP_HEADER_LEN {
            return Err(SrtpError::PacketTooShort(packet.len()));
        }
        let ssrc = BigEndian::read_u32(&packet[4..8]);
        let index = self.send_index;
        self.send_index = (self.send_index + 1) & SRTCP_INDEX_MASK;

        let iv = compute_iv(&self.session_keys.salt, ssrc, u64::from(index));
        aes_ctr_apply(&self.session_keys.enc_key, &iv, &mut packet[RTCP_HEADER_LEN..])?;
        packet.extend_from_slice(&(SRTCP_E_FLAG | index).to_be_bytes());

        let tag = self.auth_tag(packet)?;
        packet.extend_from_slice(&tag[..self.policy.auth_tag_len]);

        sink_trace!(
            self.logger,
            "[SRTCP] protected ssrc={:#x} index={}",
            ssrc,
            index
        );
        Ok(())
    }

    pub fn unprotect(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if self.closed {
            return Err(SrtpError::Closed);
        }
        let tag_len = self.policy.auth_tag_len;
        if packet.len() < RTCP_HEADER_LEN + SRTCP_INDEX_LEN + tag_len {
            return Err(SrtpError::PacketTooShort(packet.len()));
        }
        let tag_start = packet.len() - tag_len;
        let index_start = tag_start - SRTCP_INDEX_LEN;
        let ssrc = BigEndian::read_u32(&packet[4..8]);
        let e_index = BigEndian::read_u32(&packet[index_start..tag_start]);
        let index = e_index & SRTCP_INDEX_MASK;

        if self
            .replay_windows
            .get(&ssrc)
            .is_some_and(|w| w.is_replay(u64::from(index)))
        {
            sink_warn!(
                self.logger,
                "[SRTCP] replay detected: ssrc={:#x} index={}",
                ssrc,
                index
            );
            return Err(SrtpError::Replay {
                ssrc,
                index: u64::from(index),
            });
        }

        let computed = self.auth_tag(&packet[..tag_start])?;
        if !constant_time_eq(&computed[..tag_len], &packet[tag_start..]) {
            return Err(SrtpError::AuthFailed { ssrc });
        }

        packet.truncate(index_start);
        if e_index & SRTCP_E_FLAG != 0 {
            let iv = compute_iv(&self.session_keys.salt, ssrc, u64::from(index));
            aes_ctr_apply(&self.session_keys.enc_key, &iv, &mut packet[RTCP_HEADER_LEN..])?;
        }
        self.replay_windows
            .entry(ssrc)
            .or_insert_with(ReplayWindow::new)
            .record(u64::from(index));
        Ok(())
    }

    pub fn close(&mut self) {
        self.session_keys.zeroize();
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

    fn auth_tag(&self, authenticated: &[u8]) -> Result<[u8; 20], SrtpError> {
        let mut mac = HmacSha1::new_from_slice(&self.session_keys.auth_key)
            .map_err(|_| SrtpError::InvalidKeyLength(self.session_keys.auth_key.len()))?;
        mac.update(authenticated);
        let mut tag = [0u8; 20];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }
}
