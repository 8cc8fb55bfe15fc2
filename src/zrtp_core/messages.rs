//! ZRTP message bodies (RFC 6189 §5): everything between the packet header
//! and the CRC. Encoders append the trailing MAC where the message has one;
//! decoders only parse, MAC checks need keys the peer reveals later.
use byteorder::{BigEndian, ByteOrder};

use crate::identity::{ZID_LEN, Zid};
use crate::protocol::ZrtpErrorCode;
use crate::zrtp::constants::{ZRTP_EXTENSION_TYPE, ZRTP_MESSAGE_HEADER_LEN};
use crate::zrtp_core::{
    algorithms::{
        Algorithm, AlgorithmSet, AuthTagAlgorithm, CipherAlgorithm, HashAlgorithm, KeyAgreement,
        Negotiated, SasAlgorithm,
    },
    kdf::{MAC_LEN, mac8},
    zrtp_core_error::ZrtpCoreError,
};

pub const ZRTP_VERSION: &[u8; 4] = b"1.10";

pub const TYPE_HELLO: &[u8; 8] = b"Hello   ";
pub const TYPE_HELLO_ACK: &[u8; 8] = b"HelloACK";
pub const TYPE_COMMIT: &[u8; 8] = b"Commit  ";
pub const TYPE_DH_PART1: &[u8; 8] = b"DHPart1 ";
pub const TYPE_DH_PART2: &[u8; 8] = b"DHPart2 ";
pub const TYPE_CONFIRM1: &[u8; 8] = b"Confirm1";
pub const TYPE_CONFIRM2: &[u8; 8] = b"Confirm2";
pub const TYPE_CONF2_ACK: &[u8; 8] = b"Conf2ACK";
pub const TYPE_ERROR: &[u8; 8] = b"Error   ";
pub const TYPE_ERROR_ACK: &[u8; 8] = b"ErrorACK";
pub const TYPE_GO_CLEAR: &[u8; 8] = b"GoClear ";
pub const TYPE_CLEAR_ACK: &[u8; 8] = b"ClearACK";

const HASH_LEN: usize = 32;
const HELLO_FIXED_LEN: usize = ZRTP_MESSAGE_HEADER_LEN + 4 + 16 + HASH_LEN + ZID_LEN + 4 + MAC_LEN;
const COMMIT_FIXED_LEN: usize = ZRTP_MESSAGE_HEADER_LEN + HASH_LEN + ZID_LEN + 5 * 4 + MAC_LEN;
pub const HVI_LEN: usize = 32;
pub const NONCE_LEN: usize = 16;
pub const PV_LEN: usize = 32;
const DH_PART_LEN: usize = ZRTP_MESSAGE_HEADER_LEN + HASH_LEN + 4 * 8 + PV_LEN + MAC_LEN;
pub const CONFIRM_IV_LEN: usize = 16;
pub const CONFIRM_BODY_LEN: usize = HASH_LEN + 4 + 4;
const CONFIRM_LEN: usize = ZRTP_MESSAGE_HEADER_LEN + MAC_LEN + CONFIRM_IV_LEN + CONFIRM_BODY_LEN;
const ERROR_LEN: usize = ZRTP_MESSAGE_HEADER_LEN + 4;
const GO_CLEAR_LEN: usize = ZRTP_MESSAGE_HEADER_LEN + MAC_LEN;

const FLAG_SIG: u32 = 1 << 30;
const FLAG_MITM: u32 = 1 << 29;
const FLAG_PASSIVE: u32 = 1 << 28;

const CONFIRM_FLAG_ENROLLMENT: u8 = 0x08;
const CONFIRM_FLAG_SAS_VERIFIED: u8 = 0x04;
const CONFIRM_FLAG_ALLOW_CLEAR: u8 = 0x02;
const CONFIRM_FLAG_DISCLOSURE: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: [u8; 4],
    pub client_id: [u8; 16],
    pub h3: [u8; 32],
    pub zid: Zid,
    pub sig_capable: bool,
    pub mitm: bool,
    pub passive: bool,
    pub algorithms: AlgorithmSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitValue {
    Hvi([u8; HVI_LEN]),
    Nonce([u8; NONCE_LEN]),
}

impl CommitValue {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CommitValue::Hvi(h) => h,
            CommitValue::Nonce(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub h2: [u8; 32],
    pub zid: Zid,
    pub negotiated: Negotiated,
    pub value: CommitValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhPart {
    pub h1: [u8; 32],
    pub rs1_id: [u8; 8],
    pub rs2_id: [u8; 8],
    pub aux_id: [u8; 8],
    pub pbx_id: [u8; 8],
    pub pv: [u8; PV_LEN],
}

/// A Confirm as it travels: the MAC, the CFB IV and the still encrypted body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirm {
    pub confirm_mac: [u8; MAC_LEN],
    pub iv: [u8; CONFIRM_IV_LEN],
    pub encrypted: [u8; CONFIRM_BODY_LEN],
}

/// The plaintext carried inside a Confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmBody {
    pub h0: [u8; 32],
    pub enrollment: bool,
    pub sas_verified: bool,
    pub allow_clear: bool,
    pub disclosure: bool,
    pub cache_expiry: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZrtpMessage {
    Hello(Hello),
    HelloAck,
    Commit(Commit),
    DhPart1(DhPart),
    DhPart2(DhPart),
    Confirm1(Confirm),
    Confirm2(Confirm),
    Conf2Ack,
    Error(ZrtpErrorCode),
    ErrorAck,
    GoClear([u8; MAC_LEN]),
    ClearAck,
}

fn header(msg_type: &[u8; 8], total_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&ZRTP_EXTENSION_TYPE.to_be_bytes());
    out.extend_from_slice(&((total_len / 4) as u16).to_be_bytes());
    out.extend_from_slice(msg_type);
    out
}

fn append_mac(out: &mut Vec<u8>, mac_key: &[u8]) -> Result<(), ZrtpCoreError> {
    let tag = mac8(mac_key, out)?;
    out.extend_from_slice(&tag);
    Ok(())
}

fn array<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

fn push_tags<A: Algorithm>(out: &mut Vec<u8>, algs: &[A]) {
    for a in algs {
        out.extend_from_slice(a.tag());
    }
}

fn read_tags<A: Algorithm>(bytes: &[u8], at: &mut usize, count: usize) -> Vec<A> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if let Some(a) = A::from_tag(&bytes[*at..*at + 4]) {
            out.push(a);
        }
        *at += 4;
    }
    out
}

fn commit_tag<A: Algorithm>(bytes: &[u8], at: usize, code: ZrtpErrorCode) -> Result<A, ZrtpCoreError> {
    A::from_tag(&bytes[at..at + 4]).ok_or(ZrtpCoreError::Protocol(code))
}

/// Message type field of a raw message, for logging.
#[must_use]
pub fn message_type(message: &[u8]) -> Option<&[u8]> {
    message.get(4..12)
}

/// Builds one of the header-only messages (HelloACK, Conf2ACK, ErrorACK,
/// ClearACK).
#[must_use]
pub fn encode_ack(msg_type: &[u8; 8]) -> Vec<u8> {
    header(msg_type, ZRTP_MESSAGE_HEADER_LEN)
}

#[must_use]
pub fn encode_error(code: ZrtpErrorCode) -> Vec<u8> {
    let mut out = header(TYPE_ERROR, ERROR_LEN);
    out.extend_from_slice(&code.code().to_be_bytes());
    out
}

#[must_use]
pub fn encode_go_clear(clear_hmac: &[u8; MAC_LEN]) -> Vec<u8> {
    let mut out = header(TYPE_GO_CLEAR, GO_CLEAR_LEN);
    out.extend_from_slice(clear_hmac);
    out
}

impl Hello {
    fn algorithm_count(&self) -> usize {
        let a = &self.algorithms;
        a.hashes.len() + a.ciphers.len() + a.auth_tags.len() + a.key_agreements.len() + a.sas_types.len()
    }

    /// Serializes with the trailing MAC keyed by our H2.
    pub fn encode(&self, mac_key: &[u8]) -> Result<Vec<u8>, ZrtpCoreError> {
        let a = &self.algorithms;
        if [a.hashes.len(), a.ciphers.len(), a.auth_tags.len(), a.key_agreements.len(), a.sas_types.len()]
            .iter()
            .any(|n| *n > 7)
        {
            return Err(ZrtpCoreError::Malformed {
                kind: "Hello",
                reason: "more than 7 algorithms of one kind",
            });
        }
        let total = HELLO_FIXED_LEN + 4 * self.algorithm_count();
        let mut out = header(TYPE_HELLO, total);
        out.extend_from_slice(&self.version);
        out.extend_from_slice(&self.client_id);
        out.extend_from_slice(&self.h3);
        out.extend_from_slice(&self.zid);

        let mut flags = 0u32;
        if self.sig_capable {
            flags |= FLAG_SIG;
        }
        if self.mitm {
            flags |= FLAG_MITM;
        }
        if self.passive {
            flags |= FLAG_PASSIVE;
        }
        flags |= (a.hashes.len() as u32) << 16
            | (a.ciphers.len() as u32) << 12
            | (a.auth_tags.len() as u32) << 8
            | (a.key_agreements.len() as u32) << 4
            | a.sas_types.len() as u32;
        out.extend_from_slice(&flags.to_be_bytes());

        push_tags(&mut out, &a.hashes);
        push_tags(&mut out, &a.ciphers);
        push_tags(&mut out, &a.auth_tags);
        push_tags(&mut out, &a.key_agreements);
        push_tags(&mut out, &a.sas_types);
        append_mac(&mut out, mac_key)?;
        Ok(out)
    }

    fn decode(msg: &[u8]) -> Result<Self, ZrtpCoreError> {
        let malformed = |reason| ZrtpCoreError::Malformed { kind: "Hello", reason };
        if msg.len() < HELLO_FIXED_LEN {
            return Err(malformed("too short"));
        }
        let mut at = ZRTP_MESSAGE_HEADER_LEN;
        let version = array::<4>(msg, at);
        at += 4;
        let client_id = array::<16>(msg, at);
        at += 16;
        let h3 = array::<32>(msg, at);
        at += 32;
        let zid = array::<ZID_LEN>(msg, at);
        at += ZID_LEN;
        let flags = BigEndian::read_u32(&msg[at..at + 4]);
        at += 4;

        let hc = ((flags >> 16) & 0xF) as usize;
        let cc = ((flags >> 12) & 0xF) as usize;
        let ac = ((flags >> 8) & 0xF) as usize;
        let kc = ((flags >> 4) & 0xF) as usize;
        let sc = (flags & 0xF) as usize;
        if msg.len() != HELLO_FIXED_LEN + 4 * (hc + cc + ac + kc + sc) {
            return Err(malformed("algorithm counts do not match length"));
        }

        let hashes = read_tags(msg, &mut at, hc);
        let ciphers = read_tags(msg, &mut at, cc);
        let auth_tags = read_tags(msg, &mut at, ac);
        let key_agreements = read_tags(msg, &mut at, kc);
        let sas_types = read_tags(msg, &mut at, sc);

        Ok(Self {
            version,
            client_id,
            h3,
            zid,
            sig_capable: flags & FLAG_SIG != 0,
            mitm: flags & FLAG_MITM != 0,
            passive: flags & FLAG_PASSIVE != 0,
            algorithms: AlgorithmSet {
                hashes,
                ciphers,
                auth_tags,
                key_agreements,
                sas_types,
            },
        })
    }
}

impl Commit {
    /// Serializes with the trailing MAC keyed by our H1.
    pub fn encode(&self, mac_key: &[u8]) -> Result<Vec<u8>, ZrtpCoreError> {
        let total = COMMIT_FIXED_LEN + self.value.as_bytes().len();
        let mut out = header(TYPE_COMMIT, total);
        out.extend_from_slice(&self.h2);
        out.extend_from_slice(&self.zid);
        let n = &self.negotiated;
        out.extend_from_slice(n.hash.tag());
        out.extend_from_slice(n.cipher.tag());
        out.extend_from_slice(n.auth_tag.tag());
        out.extend_from_slice(n.key_agreement.tag());
        out.extend_from_slice(n.sas.tag());
        out.extend_from_slice(self.value.as_bytes());
        append_mac(&mut out, mac_key)?;
        Ok(out)
    }

    fn decode(msg: &[u8]) -> Result<Self, ZrtpCoreError> {
        let malformed = |reason| ZrtpCoreError::Malformed { kind: "Commit", reason };
        if msg.len() < COMMIT_FIXED_LEN {
            return Err(malformed("too short"));
        }
        let mut at = ZRTP_MESSAGE_HEADER_LEN;
        let h2 = array::<32>(msg, at);
        at += 32;
        let zid = array::<ZID_LEN>(msg, at);
        at += ZID_LEN;
        let hash: HashAlgorithm = commit_tag(msg, at, ZrtpErrorCode::UnsupportedHash)?;
        let cipher: CipherAlgorithm = commit_tag(msg, at + 4, ZrtpErrorCode::UnsupportedCipher)?;
        let auth_tag: AuthTagAlgorithm = commit_tag(msg, at + 8, ZrtpErrorCode::UnsupportedSrtpAuth)?;
        let key_agreement: KeyAgreement =
            commit_tag(msg, at + 12, ZrtpErrorCode::UnsupportedKeyAgreement)?;
        let sas: SasAlgorithm = commit_tag(msg, at + 16, ZrtpErrorCode::UnsupportedSas)?;
        at += 20;

        let value = match key_agreement {
            KeyAgreement::Mult => {
                if msg.len() != COMMIT_FIXED_LEN + NONCE_LEN {
                    return Err(malformed("bad multi-stream length"));
                }
                CommitValue::Nonce(array::<NONCE_LEN>(msg, at))
            }
            KeyAgreement::X255 => {
                if msg.len() != COMMIT_FIXED_LEN + HVI_LEN {
                    return Err(malformed("bad DH length"));
                }
                CommitValue::Hvi(array::<HVI_LEN>(msg, at))
            }
        };

        Ok(Self {
            h2,
            zid,
            negotiated: Negotiated {
                hash,
                cipher,
                auth_tag,
                key_agreement,
                sas,
            },
            value,
        })
    }
}

impl DhPart {
    /// Serializes as DHPart1 or DHPart2 with the MAC keyed by our H0.
    pub fn encode(&self, part1: bool, mac_key: &[u8]) -> Result<Vec<u8>, ZrtpCoreError> {
        let msg_type = if part1 { TYPE_DH_PART1 } else { TYPE_DH_PART2 };
        let mut out = header(msg_type, DH_PART_LEN);
        out.extend_from_slice(&self.h1);
        out.extend_from_slice(&self.rs1_id);
        out.extend_from_slice(&self.rs2_id);
        out.extend_from_slice(&self.aux_id);
        out.extend_from_slice(&self.pbx_id);
        out.extend_from_slice(&self.pv);
        append_mac(&mut out, mac_key)?;
        Ok(out)
    }

    fn decode(msg: &[u8]) -> Result<Self, ZrtpCoreError> {
        if msg.len() != DH_PART_LEN {
            return Err(ZrtpCoreError::Malformed {
                kind: "DHPart",
                reason: "bad length",
            });
        }
        let at = ZRTP_MESSAGE_HEADER_LEN;
        Ok(Self {
            h1: array(msg, at),
            rs1_id: array(msg, at + 32),
            rs2_id: array(msg, at + 40),
            aux_id: array(msg, at + 48),
            pbx_id: array(msg, at + 56),
            pv: array(msg, at + 64),
        })
    }
}

impl Confirm {
    #[must_use]
    pub fn encode(&self, first: bool) -> Vec<u8> {
        let msg_type = if first { TYPE_CONFIRM1 } else { TYPE_CONFIRM2 };
        let mut out = header(msg_type, CONFIRM_LEN);
        out.extend_from_slice(&self.confirm_mac);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.encrypted);
        out
    }

    fn decode(msg: &[u8]) -> Result<Self, ZrtpCoreError> {
        if msg.len() != CONFIRM_LEN {
            return Err(ZrtpCoreError::Malformed {
                kind: "Confirm",
                reason: "bad length",
            });
        }
        let at = ZRTP_MESSAGE_HEADER_LEN;
        Ok(Self {
            confirm_mac: array(msg, at),
            iv: array(msg, at + MAC_LEN),
            encrypted: array(msg, at + MAC_LEN + CONFIRM_IV_LEN),
        })
    }
}

impl ConfirmBody {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CONFIRM_BODY_LEN] {
        let mut out = [0u8; CONFIRM_BODY_LEN];
        out[..32].copy_from_slice(&self.h0);
        // Signature length stays zero: no signature block follows.
        let mut flags = 0u8;
        if self.enrollment {
            flags |= CONFIRM_FLAG_ENROLLMENT;
        }
        if self.sas_verified {
            flags |= CONFIRM_FLAG_SAS_VERIFIED;
        }
        if self.allow_clear {
            flags |= CONFIRM_FLAG_ALLOW_CLEAR;
        }
        if self.disclosure {
            flags |= CONFIRM_FLAG_DISCLOSURE;
        }
        out[35] = flags;
        BigEndian::write_u32(&mut out[36..40], self.cache_expiry);
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; CONFIRM_BODY_LEN]) -> Self {
        let flags = bytes[35];
        Self {
            h0: array(bytes, 0),
            enrollment: flags & CONFIRM_FLAG_ENROLLMENT != 0,
            sas_verified: flags & CONFIRM_FLAG_SAS_VERIFIED != 0,
            allow_clear: flags & CONFIRM_FLAG_ALLOW_CLEAR != 0,
            disclosure: flags & CONFIRM_FLAG_DISCLOSURE != 0,
            cache_expiry: BigEndian::read_u32(&bytes[36..40]),
        }
    }
}

impl ZrtpMessage {
    /// Parses one message (preamble through MAC, CRC already stripped).
    pub fn decode(msg: &[u8]) -> Result<Self, ZrtpCoreError> {
        let malformed = |reason| ZrtpCoreError::Malformed { kind: "ZRTP", reason };
        if msg.len() < ZRTP_MESSAGE_HEADER_LEN {
            return Err(malformed("shorter than message header"));
        }
        if BigEndian::read_u16(&msg[0..2]) != ZRTP_EXTENSION_TYPE {
            return Err(malformed("bad preamble"));
        }
        if BigEndian::read_u16(&msg[2..4]) as usize * 4 != msg.len() {
            return Err(malformed("length field does not match"));
        }
        let fixed = |len: usize, m: ZrtpMessage| {
            if msg.len() == len {
                Ok(m)
            } else {
                Err(malformed("bad length"))
            }
        };

        let kind: &[u8] = &msg[4..12];
        match kind {
            k if k == TYPE_HELLO => Hello::decode(msg).map(ZrtpMessage::Hello),
            k if k == TYPE_HELLO_ACK => fixed(ZRTP_MESSAGE_HEADER_LEN, ZrtpMessage::HelloAck),
            k if k == TYPE_COMMIT => Commit::decode(msg).map(ZrtpMessage::Commit),
            k if k == TYPE_DH_PART1 => DhPart::decode(msg).map(ZrtpMessage::DhPart1),
            k if k == TYPE_DH_PART2 => DhPart::decode(msg).map(ZrtpMessage::DhPart2),
            k if k == TYPE_CONFIRM1 => Confirm::decode(msg).map(ZrtpMessage::Confirm1),
            k if k == TYPE_CONFIRM2 => Confirm::decode(msg).map(ZrtpMessage::Confirm2),
            k if k == TYPE_CONF2_ACK => fixed(ZRTP_MESSAGE_HEADER_LEN, ZrtpMessage::Conf2Ack),
            k if k == TYPE_ERROR => {
                if msg.len() != ERROR_LEN {
                    return Err(malformed("bad length"));
                }
                let code = BigEndian::read_u32(&msg[12..16]);
                Ok(ZrtpMessage::Error(ZrtpErrorCode::from_code(code)))
            }
            k if k == TYPE_ERROR_ACK => fixed(ZRTP_MESSAGE_HEADER_LEN, ZrtpMessage::ErrorAck),
            k if k == TYPE_GO_CLEAR => {
                if msg.len() != GO_CLEAR_LEN {
                    return Err(malformed("bad length"));
                }
                Ok(ZrtpMessage::GoClear(array(msg, 12)))
            }
            k if k == TYPE_CLEAR_ACK => fixed(ZRTP_MESSAGE_HEADER_LEN, ZrtpMessage::ClearAck),
            other => Err(ZrtpCoreError::UnknownType(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ZrtpMessage::Hello(_) => "Hello",
            ZrtpMessage::HelloAck => "HelloACK",
            ZrtpMessage::Commit(_) => "Commit",
            ZrtpMessage::DhPart1(_) => "DHPart1",
            ZrtpMessage::DhPart2(_) => "DHPart2",
            ZrtpMessage::Confirm1(_) => "Confirm1",
            ZrtpMessage::Confirm2(_) => "Confirm2",
            ZrtpMessage::Conf2Ack => "Conf2ACK",
            ZrtpMessage::Error(_) => "Error",
            ZrtpMessage::ErrorAck => "ErrorACK",
            ZrtpMessage::GoClear(_) => "GoClear",
            ZrtpMessage::ClearAck => "ClearACK",
        }
    }
}
