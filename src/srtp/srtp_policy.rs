use crate::srtp::constants::{AUTH_TAG_LEN_32, AUTH_TAG_LEN_80, SESSION_SALT_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SrtpCipher {
    AesCm128,
    AesCm256,
}

impl SrtpCipher {
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            SrtpCipher::AesCm128 => 16,
            SrtpCipher::AesCm256 => 32,
        }
    }
}

/// Cipher, tag length and salt length of one SRTP crypto context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrtpPolicy {
    pub cipher: SrtpCipher,
    pub auth_tag_len: usize,
    pub salt_len: usize,
}

impl SrtpPolicy {
    pub const AES128_CM_HMAC_SHA1_80: SrtpPolicy = SrtpPolicy::new(SrtpCipher::AesCm128, AUTH_TAG_LEN_80);
    pub const AES128_CM_HMAC_SHA1_32: SrtpPolicy = SrtpPolicy::new(SrtpCipher::AesCm128, AUTH_TAG_LEN_32);
    pub const AES256_CM_HMAC_SHA1_80: SrtpPolicy = SrtpPolicy::new(SrtpCipher::AesCm256, AUTH_TAG_LEN_80);
    pub const AES256_CM_HMAC_SHA1_32: SrtpPolicy = SrtpPolicy::new(SrtpCipher::AesCm256, AUTH_TAG_LEN_32);

    #[must_use]
    pub const fn new(cipher: SrtpCipher, auth_tag_len: usize) -> Self {
        Self {
            cipher,
            auth_tag_len,
            salt_len: SESSION_SALT_LEN,
        }
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        self.cipher.key_len()
    }
}
