use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::zrtp_core::zrtp_core_error::ZrtpCoreError;

pub type HmacSha256 = Hmac<Sha256>;

/// Length of the truncated MACs carried in ZRTP messages.
pub const MAC_LEN: usize = 8;

pub const LABEL_INITIATOR_SRTP_KEY: &str = "Initiator SRTP master key";
pub const LABEL_INITIATOR_SRTP_SALT: &str = "Initiator SRTP master salt";
pub const LABEL_RESPONDER_SRTP_KEY: &str = "Responder SRTP master key";
pub const LABEL_RESPONDER_SRTP_SALT: &str = "Responder SRTP master salt";
pub const LABEL_INITIATOR_HMAC_KEY: &str = "Initiator HMAC key";
pub const LABEL_RESPONDER_HMAC_KEY: &str = "Responder HMAC key";
pub const LABEL_INITIATOR_ZRTP_KEY: &str = "Initiator ZRTP key";
pub const LABEL_RESPONDER_ZRTP_KEY: &str = "Responder ZRTP key";
pub const LABEL_SAS: &str = "SAS";
pub const LABEL_SESSION_KEY: &str = "ZRTP Session Key";
pub const LABEL_RETAINED_SECRET: &str = "retained secret";
pub const LABEL_MSK: &str = "ZRTP MSK";
pub const LABEL_KDF: &str = "ZRTP-HMAC-KDF";

#[must_use]
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], ZrtpCoreError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| ZrtpCoreError::InvalidKeyLength(key.len()))?;
    for p in parts {
        mac.update(p);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// HMAC-SHA256 truncated to the 64 bits carried in Hello, Commit, DHPart
/// and Confirm.
pub fn mac8(key: &[u8], data: &[u8]) -> Result<[u8; MAC_LEN], ZrtpCoreError> {
    let full = hmac_sha256(key, &[data])?;
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&full[..MAC_LEN]);
    Ok(out)
}

/// Checks the trailing MAC of `message` against `key`.
pub fn verify_trailing_mac(key: &[u8], message: &[u8]) -> Result<bool, ZrtpCoreError> {
    if message.len() < MAC_LEN {
        return Ok(false);
    }
    let (body, tag) = message.split_at(message.len() - MAC_LEN);
    let expected = mac8(key, body)?;
    Ok(constant_time_eq(&expected, tag))
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// KDF of RFC 6189 §4.5.1:
/// `HMAC(KI, i || Label || 0x00 || Context || L)` truncated to `bits`.
pub fn kdf(ki: &[u8], label: &str, context: &[u8], bits: u32) -> Result<Vec<u8>, ZrtpCoreError> {
    let out = hmac_sha256(
        ki,
        &[
            &1u32.to_be_bytes(),
            label.as_bytes(),
            &[0u8],
            context,
            &bits.to_be_bytes(),
        ],
    )?;
    let n = (bits as usize / 8).min(out.len());
    Ok(out[..n].to_vec())
}

pub fn kdf32(ki: &[u8], label: &str, context: &[u8]) -> Result<[u8; 32], ZrtpCoreError> {
    let v = kdf(ki, label, context, 256)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&v);
    Ok(out)
}

/// s0 for a DH exchange (RFC 6189 §4.4.1.4). Missing shared secrets are
/// encoded with a zero length.
#[must_use]
pub fn compute_s0(
    dh_result: &[u8],
    zid_i: &[u8],
    zid_r: &[u8],
    total_hash: &[u8; 32],
    s1: Option<&[u8]>,
    s2: Option<&[u8]>,
    s3: Option<&[u8]>,
) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(1u32.to_be_bytes());
    h.update(dh_result);
    h.update(LABEL_KDF.as_bytes());
    h.update(zid_i);
    h.update(zid_r);
    h.update(total_hash);
    for s in [s1, s2, s3] {
        let s = s.unwrap_or(&[]);
        h.update((s.len() as u32).to_be_bytes());
        h.update(s);
    }
    h.finalize().into()
}
