use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::Zid;
use crate::protocol::{Role, SrtpSecrets};
use crate::zrtp_core::{
    algorithms::Negotiated,
    kdf::{
        LABEL_INITIATOR_HMAC_KEY, LABEL_INITIATOR_SRTP_KEY, LABEL_INITIATOR_SRTP_SALT,
        LABEL_INITIATOR_ZRTP_KEY, LABEL_RESPONDER_HMAC_KEY, LABEL_RESPONDER_SRTP_KEY,
        LABEL_RESPONDER_SRTP_SALT, LABEL_RESPONDER_ZRTP_KEY, LABEL_RETAINED_SECRET, LABEL_SAS,
        LABEL_SESSION_KEY, kdf, kdf32,
    },
    zrtp_core_error::ZrtpCoreError,
};

const SRTP_SALT_BITS: u32 = 112;

/// Everything derived from s0 for one stream (RFC 6189 §4.5.3).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeySchedule {
    pub s0: [u8; 32],
    pub kdf_context: Vec<u8>,
    pub srtp_key_i: Vec<u8>,
    pub srtp_salt_i: Vec<u8>,
    pub srtp_key_r: Vec<u8>,
    pub srtp_salt_r: Vec<u8>,
    pub mac_key_i: [u8; 32],
    pub mac_key_r: [u8; 32],
    pub zrtp_key_i: Vec<u8>,
    pub zrtp_key_r: Vec<u8>,
    /// ZRTPSess: keys later multi-stream sessions.
    pub session_key: [u8; 32],
    pub sas_hash: [u8; 32],
    /// Retained secret to store for the next call with this peer.
    pub new_rs1: [u8; 32],
    #[zeroize(skip)]
    pub negotiated: Negotiated,
}

impl KeySchedule {
    /// `session_key` is the master stream's ZRTPSess in multi-stream mode,
    /// `None` for a DH stream, which derives its own.
    pub fn derive(
        s0: [u8; 32],
        zid_i: &Zid,
        zid_r: &Zid,
        total_hash: &[u8; 32],
        negotiated: Negotiated,
        session_key: Option<[u8; 32]>,
    ) -> Result<Self, ZrtpCoreError> {
        let mut ctx = Vec::with_capacity(zid_i.len() + zid_r.len() + total_hash.len());
        ctx.extend_from_slice(zid_i);
        ctx.extend_from_slice(zid_r);
        ctx.extend_from_slice(total_hash);

        let key_bits = (negotiated.cipher.key_len() * 8) as u32;
        let session_key = match session_key {
            Some(k) => k,
            None => kdf32(&s0, LABEL_SESSION_KEY, &ctx)?,
        };

        Ok(Self {
            srtp_key_i: kdf(&s0, LABEL_INITIATOR_SRTP_KEY, &ctx, key_bits)?,
            srtp_salt_i: kdf(&s0, LABEL_INITIATOR_SRTP_SALT, &ctx, SRTP_SALT_BITS)?,
            srtp_key_r: kdf(&s0, LABEL_RESPONDER_SRTP_KEY, &ctx, key_bits)?,
            srtp_salt_r: kdf(&s0, LABEL_RESPONDER_SRTP_SALT, &ctx, SRTP_SALT_BITS)?,
            mac_key_i: kdf32(&s0, LABEL_INITIATOR_HMAC_KEY, &ctx)?,
            mac_key_r: kdf32(&s0, LABEL_RESPONDER_HMAC_KEY, &ctx)?,
            zrtp_key_i: kdf(&s0, LABEL_INITIATOR_ZRTP_KEY, &ctx, key_bits)?,
            zrtp_key_r: kdf(&s0, LABEL_RESPONDER_ZRTP_KEY, &ctx, key_bits)?,
            sas_hash: kdf32(&s0, LABEL_SAS, &ctx)?,
            new_rs1: kdf32(&s0, LABEL_RETAINED_SECRET, &ctx)?,
            session_key,
            s0,
            kdf_context: ctx,
            negotiated,
        })
    }

    /// MAC and ZRTP keys used by `role` for what it sends.
    #[must_use]
    pub fn sending_keys(&self, role: Role) -> (&[u8; 32], &[u8]) {
        match role {
            Role::Initiator => (&self.mac_key_i, &self.zrtp_key_i),
            Role::Responder => (&self.mac_key_r, &self.zrtp_key_r),
        }
    }

    #[must_use]
    pub fn srtp_secrets(&self, role: Role) -> SrtpSecrets {
        SrtpSecrets {
            cipher: self.negotiated.cipher.srtp_cipher(),
            auth_tag_len: self.negotiated.auth_tag.tag_len(),
            key_initiator: self.srtp_key_i.clone(),
            salt_initiator: self.srtp_salt_i.clone(),
            key_responder: self.srtp_key_r.clone(),
            salt_responder: self.srtp_salt_r.clone(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::zrtp_core::algorithms::{
        AuthTagAlgorithm, CipherAlgorithm, HashAlgorithm, KeyAgreement, SasAlgorithm,
    };

    fn negotiated(cipher: CipherAlgorithm) -> Negotiated {
        Negotiated {
            hash: HashAlgorithm::S256,
            cipher,
            auth_tag: AuthTagAlgorithm::Hs80,
            key_agreement: KeyAgreement::X255,
            sas: SasAlgorithm::B32,
        }
    }

    #[test]
    fn key_sizes_follow_cipher() {
        let ks = KeySchedule::derive(
            [1u8; 32],
            &[2u8; 12],
            &[3u8; 12],
            &[4u8; 32],
            negotiated(CipherAlgorithm::Aes1),
            None,
        )
        .unwrap();
        assert_eq!(ks.srtp_key_i.len(), 16);
        assert_eq!(ks.srtp_salt_r.len(), 14);
        assert_eq!(ks.zrtp_key_r.len(), 16);
        assert_eq!(ks.kdf_context.len(), 56);
        assert_ne!(ks.srtp_key_i, ks.srtp_key_r);

        let ks256 = KeySchedule::derive(
            [1u8; 32],
            &[2u8; 12],
            &[3u8; 12],
            &[4u8; 32],
            negotiated(CipherAlgorithm::Aes3),
            None,
        )
        .unwrap();
        assert_eq!(ks256.srtp_key_i.len(), 32);
    }

    #[test]
    fn multi_stream_keeps_master_session_key() {
        let ks = KeySchedule::derive(
            [1u8; 32],
            &[2u8; 12],
            &[3u8; 12],
            &[4u8; 32],
            negotiated(CipherAlgorithm::Aes1),
            Some([9u8; 32]),
        )
        .unwrap();
        assert_eq!(ks.session_key, [9u8; 32]);
        let secrets = ks.srtp_secrets(Role::Responder);
        assert_eq!(secrets.key_initiator, ks.srtp_key_i);
        assert_eq!(secrets.auth_tag_len, 10);
    }
}
