use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SrtpError {
    #[error("packet too short: {0} bytes")]
    PacketTooShort(usize),
    #[error("malformed RTP header")]
    MalformedHeader,
    #[error("invalid master key length: {0}")]
    InvalidKeyLength(usize),
    #[error("invalid master salt length: {0}")]
    InvalidSaltLength(usize),
    #[error("replayed packet: ssrc={ssrc:#x} index={index}")]
    Replay { ssrc: u32, index: u64 },
    #[error("authentication tag mismatch: ssrc={ssrc:#x}")]
    AuthFailed { ssrc: u32 },
    #[error("crypto context already closed")]
    Closed,
}
