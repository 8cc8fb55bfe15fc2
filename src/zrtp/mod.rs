//! Framing of ZRTP control packets carried on the RTP flow (RFC 6189 §5).
pub mod constants;
pub mod crc;
pub mod zrtp_packet;
pub mod zrtp_sequence;

pub use zrtp_packet::{ZrtpValidation, encode, is_zrtp_control_packet, message, validate};
pub use zrtp_sequence::ZrtpSequence;
