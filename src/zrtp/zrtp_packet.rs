//! Recognition, validation and construction of ZRTP packets.
//!
//! ```text
//!  0                   1                   2                   3
//! |0 0 0 1|0 0 0 0|0 0 0 0 0 0 0 0|        Sequence Number        |
//! |                 Magic Cookie 'ZRTP' (0x5a525450)              |
//! |                        Source Identifier                      |
//! |           ZRTP Message (length depends on Message Type)       |
//! |                          CRC (1 word)                         |
//! ```

use byteorder::{BigEndian, ByteOrder};

use crate::rtp::RawPacket;
use crate::zrtp::constants::{
    ZRTP_CRC_LEN, ZRTP_EXTENSION_TYPE, ZRTP_FIRST_BYTE, ZRTP_HEADER_LEN, ZRTP_MAGIC,
    ZRTP_MESSAGE_HEADER_LEN,
};
use crate::zrtp::crc::zrtp_crc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZrtpValidation {
    Ok,
    BadCrc,
    NotZrtp,
}

/// True iff the extension bit is set and the extension type is `0x505A`.
///
/// This is the only test that separates ZRTP from (S)RTP media on a shared
/// flow, so it must run before anything else looks at the packet.
#[must_use]
pub fn is_zrtp_control_packet(bytes: &[u8]) -> bool {
    let Some(&first) = bytes.first() else {
        return false;
    };
    if first & 0x10 == 0 {
        return false;
    }
    let ext_offset = ZRTP_HEADER_LEN + 4 * usize::from(first & 0x0F);
    bytes
        .get(ext_offset..ext_offset + 2)
        .is_some_and(|t| BigEndian::read_u16(t) == ZRTP_EXTENSION_TYPE)
}

#[must_use]
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes
        .get(4..8)
        .is_some_and(|m| BigEndian::read_u32(m) == ZRTP_MAGIC)
}

/// Checks magic and trailing CRC-32C. Only `Ok` packets reach the protocol engine.
#[must_use]
pub fn validate(bytes: &[u8]) -> ZrtpValidation {
    if !is_zrtp_control_packet(bytes)
        || !has_magic(bytes)
        || bytes.len() < ZRTP_HEADER_LEN + ZRTP_MESSAGE_HEADER_LEN + ZRTP_CRC_LEN
    {
        return ZrtpValidation::NotZrtp;
    }
    let crc_at = bytes.len() - ZRTP_CRC_LEN;
    let stored = BigEndian::read_u32(&bytes[crc_at..]);
    if zrtp_crc(&bytes[..crc_at]) == stored {
        ZrtpValidation::Ok
    } else {
        ZrtpValidation::BadCrc
    }
}

/// The ZRTP message: from the preamble up to, not including, the CRC.
#[must_use]
pub fn message(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < ZRTP_HEADER_LEN + ZRTP_CRC_LEN {
        return None;
    }
    Some(&bytes[ZRTP_HEADER_LEN..bytes.len() - ZRTP_CRC_LEN])
}

#[must_use]
pub fn ssrc(bytes: &[u8]) -> Option<u32> {
    bytes.get(8..12).map(BigEndian::read_u32)
}

/// Wraps `message` in a ZRTP packet header and appends the CRC.
#[must_use]
pub fn encode(message: &[u8], sequence_number: u16, ssrc: u32) -> RawPacket {
    let mut buf = Vec::with_capacity(ZRTP_HEADER_LEN + message.len() + ZRTP_CRC_LEN);
    buf.push(ZRTP_FIRST_BYTE);
    buf.push(0);
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&ZRTP_MAGIC.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(message);
    let crc = zrtp_crc(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    RawPacket::from_vec(buf)
}
