pub(super) type HmacSha1 = Hmac<Sha1>;
type Aes128Ctr = Ctr128BE<Aes128>;
type Aes256Ctr = Ctr128BE<Aes256>;

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use byteorder::{BigEndian, ByteOrder};
use ctr::Ctr128BE;
use hmac::Hmac;
use sha1::Sha1;

use crate::srtp::{
    SrtpEndpointKeys, SrtpError, SrtpPolicy,
    constants::{RTP_HEADER_LEN, SESSION_AUTH_LEN, SESSION_SALT_LEN},
    session_keys::SessionKeys,
};

/// The three key derivation labels of one context (RTP: 0/1/2, RTCP: 3/4/5).
#[derive(Debug, Clone, Copy)]
pub(super) struct KeyLabels {
    pub(super) encryption: u8,
    pub(super) auth: u8,
    pub(super) salt: u8,
}

/// Constant-time comparison so a forged tag leaks nothing about where it differs.
pub(super) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

pub(super) fn derive_session_keys(
    master: &SrtpEndpointKeys,
    policy: &SrtpPolicy,
    labels: KeyLabels,
) -> Result<SessionKeys, SrtpError> {
    if master.master_key.len() != policy.key_len() {
        return Err(SrtpError::InvalidKeyLength(master.master_key.len()));
    }
    if master.master_salt.len() > SESSION_SALT_LEN {
        return Err(SrtpError::InvalidSaltLength(master.master_salt.len()));
    }

    let mut salt_pad = [0u8; 16];
    salt_pad[..master.master_salt.len()].copy_from_slice(&master.master_salt);

    let mut keys = SessionKeys {
        enc_key: vec![0u8; policy.key_len()],
        auth_key: [0u8; SESSION_AUTH_LEN],
        salt: [0u8; SESSION_SALT_LEN],
    };
    aes_cm_prf(&master.master_key, &salt_pad, labels.encryption, &mut keys.enc_key)?;
    aes_cm_prf(&master.master_key, &salt_pad, labels.auth, &mut keys.auth_key)?;
    aes_cm_prf(&master.master_key, &salt_pad, labels.salt, &mut keys.salt)?;
    salt_pad.fill(0);
    Ok(keys)
}

/// AES-CM PRF of RFC 3711 §4.3.3 with a key derivation rate of zero.
pub(super) fn aes_cm_prf(
    master_key: &[u8],
    master_salt_padded: &[u8; 16],
    label: u8,
    out: &mut [u8],
) -> Result<(), SrtpError> {
    let mut iv = *master_salt_padded;
    iv[7] ^= label;
    out.fill(0);
    aes_ctr_apply(master_key, &iv, out)
}

/// XORs the AES-CTR keystream over `buf`; key length selects AES-128 or AES-256.
pub(super) fn aes_ctr_apply(key: &[u8], iv: &[u8; 16], buf: &mut [u8]) -> Result<(), SrtpError> {
    match key.len() {
        16 => {
            let mut cipher = Aes128Ctr::new_from_slices(key, iv)
                .map_err(|_| SrtpError::InvalidKeyLength(key.len()))?;
            cipher.apply_keystream(buf);
        }
        32 => {
            let mut cipher = Aes256Ctr::new_from_slices(key, iv)
                .map_err(|_| SrtpError::InvalidKeyLength(key.len()))?;
            cipher.apply_keystream(buf);
        }
        n => return Err(SrtpError::InvalidKeyLength(n)),
    }
    Ok(())
}

pub(super) fn compute_iv(session_salt: &[u8; 14], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..14].copy_from_slice(session_salt);

    for (dst, src) in iv[4..8].iter_mut().zip(ssrc.to_be_bytes()) {
        *dst ^= src;
    }
    for (dst, src) in iv[8..14].iter_mut().zip(&index.to_be_bytes()[2..]) {
        *dst ^= src;
    }
    iv
}

pub(super) fn get_rtp_header_len(packet: &[u8]) -> Result<usize, SrtpError> {
    if packet.len() < RTP_HEADER_LEN {
        return Err(SrtpError::PacketTooShort(packet.len()));
    }
    let v_p_x_cc = packet[0];
    let cc = usize::from(v_p_x_cc & 0x0F);
    let x = (v_p_x_cc & 0x10) != 0;

    let mut len = RTP_HEADER_LEN + cc * 4;
    if x {
        if packet.len() < len + 4 {
            return Err(SrtpError::MalformedHeader);
        }
        let ext_len = BigEndian::read_u16(&packet[len + 2..len + 4]);
        len += 4 + usize::from(ext_len) * 4;
    }

    if packet.len() < len {
        return Err(SrtpError::MalformedHeader);
    }
    Ok(len)
}
