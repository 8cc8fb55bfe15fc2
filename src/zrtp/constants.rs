/// First byte of every ZRTP packet: version 0, extension bit set.
pub const ZRTP_FIRST_BYTE: u8 = 0x10;
/// "ZRTP" in ASCII, bytes 4..8.
pub const ZRTP_MAGIC: u32 = 0x5A52_5450;
/// Message preamble, read by RTP parsers as the extension type.
pub const ZRTP_EXTENSION_TYPE: u16 = 0x505A;

pub const ZRTP_HEADER_LEN: usize = 12;
pub const ZRTP_CRC_LEN: usize = 4;
/// Preamble, length and the 8 byte message type.
pub const ZRTP_MESSAGE_HEADER_LEN: usize = 12;
