use std::fmt;

use crate::protocol::zrtp_error_code::ZrtpErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageSeverity {
    Info,
    Warning,
    Severe,
    /// A ZRTP Error message was sent or received.
    Error,
}

/// Status and diagnostic codes reported by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    // Info
    HelloReceived,
    CommitDhGenerated,
    RespCommitReceived,
    DhPart1Received,
    DhPart2Received,
    Confirm1Received,
    Confirm2Received,
    SecureStateOn,
    SecureStateOff,

    // Warning
    CrcMismatch,
    NoRsMatch,
    NoExpectedAuxMatch,
    SrtpAuthError,
    SrtpReplayError,
    GoClearRejected,

    // Severe
    HelloHmacFailed,
    CommitHmacFailed,
    DhPart1HmacFailed,
    DhPart2HmacFailed,
    ConfirmMacFailed,
    SrtpSecretsFailed,
    TooMuchRetries,
    ProtocolError,
    CannotSend,

    /// Carries the code of a ZRTP Error message.
    Zrtp(ZrtpErrorCode),
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageCode::Zrtp(code) => write!(f, "ZRTP error {code}"),
            other => write!(f, "{other:?}"),
        }
    }
}
