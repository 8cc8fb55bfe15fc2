use std::fmt;

/// Error codes carried in the ZRTP Error message (RFC 6189 §5.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZrtpErrorCode {
    MalformedPacket,
    CriticalSoftwareError,
    UnsupportedVersion,
    HelloComponentsMismatch,
    UnsupportedHash,
    UnsupportedCipher,
    UnsupportedKeyAgreement,
    UnsupportedSrtpAuth,
    UnsupportedSas,
    NoSharedSecret,
    DhBadPublicValue,
    DhHviMismatch,
    SasUntrustedMitm,
    ConfirmMacWrong,
    NonceReused,
    EqualZid,
    SsrcCollision,
    GoClearNotAllowed,
    Unknown(u32),
}

impl ZrtpErrorCode {
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            ZrtpErrorCode::MalformedPacket => 0x10,
            ZrtpErrorCode::CriticalSoftwareError => 0x20,
            ZrtpErrorCode::UnsupportedVersion => 0x30,
            ZrtpErrorCode::HelloComponentsMismatch => 0x40,
            ZrtpErrorCode::UnsupportedHash => 0x51,
            ZrtpErrorCode::UnsupportedCipher => 0x52,
            ZrtpErrorCode::UnsupportedKeyAgreement => 0x53,
            ZrtpErrorCode::UnsupportedSrtpAuth => 0x54,
            ZrtpErrorCode::UnsupportedSas => 0x55,
            ZrtpErrorCode::NoSharedSecret => 0x56,
            ZrtpErrorCode::DhBadPublicValue => 0x61,
            ZrtpErrorCode::DhHviMismatch => 0x62,
            ZrtpErrorCode::SasUntrustedMitm => 0x63,
            ZrtpErrorCode::ConfirmMacWrong => 0x70,
            ZrtpErrorCode::NonceReused => 0x80,
            ZrtpErrorCode::EqualZid => 0x90,
            ZrtpErrorCode::SsrcCollision => 0x91,
            ZrtpErrorCode::GoClearNotAllowed => 0x100,
            ZrtpErrorCode::Unknown(c) => c,
        }
    }

    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0x10 => ZrtpErrorCode::MalformedPacket,
            0x20 => ZrtpErrorCode::CriticalSoftwareError,
            0x30 => ZrtpErrorCode::UnsupportedVersion,
            0x40 => ZrtpErrorCode::HelloComponentsMismatch,
            0x51 => ZrtpErrorCode::UnsupportedHash,
            0x52 => ZrtpErrorCode::UnsupportedCipher,
            0x53 => ZrtpErrorCode::UnsupportedKeyAgreement,
            0x54 => ZrtpErrorCode::UnsupportedSrtpAuth,
            0x55 => ZrtpErrorCode::UnsupportedSas,
            0x56 => ZrtpErrorCode::NoSharedSecret,
            0x61 => ZrtpErrorCode::DhBadPublicValue,
            0x62 => ZrtpErrorCode::DhHviMismatch,
            0x63 => ZrtpErrorCode::SasUntrustedMitm,
            0x70 => ZrtpErrorCode::ConfirmMacWrong,
            0x80 => ZrtpErrorCode::NonceReused,
            0x90 => ZrtpErrorCode::EqualZid,
            0x91 => ZrtpErrorCode::SsrcCollision,
            0x100 => ZrtpErrorCode::GoClearNotAllowed,
            other => ZrtpErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for ZrtpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} ({:?})", self.code(), self)
    }
}
