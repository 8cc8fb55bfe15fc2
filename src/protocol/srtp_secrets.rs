use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::protocol::role::Role;
use crate::srtp::{SrtpCipher, SrtpPolicy};

/// SRTP master keys and salts for both roles, as handed over by
/// `srtp_secrets_ready`. Wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SrtpSecrets {
    #[zeroize(skip)]
    pub cipher: SrtpCipher,
    pub auth_tag_len: usize,
    pub key_initiator: Vec<u8>,
    pub salt_initiator: Vec<u8>,
    pub key_responder: Vec<u8>,
    pub salt_responder: Vec<u8>,
    /// Our own role in the exchange.
    #[zeroize(skip)]
    pub role: Role,
}

impl SrtpSecrets {
    #[must_use]
    pub fn policy(&self) -> SrtpPolicy {
        SrtpPolicy::new(self.cipher, self.auth_tag_len)
    }
}

impl fmt::Debug for SrtpSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrtpSecrets")
            .field("cipher", &self.cipher)
            .field("auth_tag_len", &self.auth_tag_len)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
