pub const RTP_VERSION: u8 = 2;
pub const RTP_FIXED_HEADER_LEN: usize = 12;
pub const RTP_EXT_HEADER_LEN: usize = 4;
pub const RTCP_FIXED_HEADER_LEN: usize = 8;

pub const EXTENSION_BIT: u8 = 0x10;
pub const CSRC_COUNT_MASK: u8 = 0x0F;
