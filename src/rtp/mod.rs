//! Byte-level view over one RTP/RTCP datagram.
pub mod constants;
pub mod raw_packet;
pub mod rtp_error;

pub use raw_packet::RawPacket;
pub use rtp_error::RtpError;
