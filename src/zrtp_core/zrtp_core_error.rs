use thiserror::Error;

use crate::identity::IdentityError;
use crate::protocol::ZrtpErrorCode;

#[derive(Debug, Error)]
pub enum ZrtpCoreError {
    #[error("malformed {kind} message: {reason}")]
    Malformed {
        kind: &'static str,
        reason: &'static str,
    },
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("{0} MAC check failed")]
    BadMac(&'static str),
    #[error("protocol error {0}")]
    Protocol(ZrtpErrorCode),
    #[error("invalid key length {0}")]
    InvalidKeyLength(usize),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl ZrtpCoreError {
    /// Error code to send to the peer when this error aborts the exchange.
    #[must_use]
    pub fn wire_code(&self) -> ZrtpErrorCode {
        match self {
            ZrtpCoreError::Malformed { .. } | ZrtpCoreError::UnknownType(_) => {
                ZrtpErrorCode::MalformedPacket
            }
            ZrtpCoreError::BadMac(_) => ZrtpErrorCode::ConfirmMacWrong,
            ZrtpCoreError::Protocol(code) => *code,
            ZrtpCoreError::InvalidKeyLength(_) | ZrtpCoreError::Identity(_) => {
                ZrtpErrorCode::CriticalSoftwareError
            }
        }
    }
}
