use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::srtp::constants::{SESSION_AUTH_LEN, SESSION_SALT_LEN};

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionKeys {
    pub(crate) enc_key: Vec<u8>,
    pub(crate) auth_key: [u8; SESSION_AUTH_LEN],
    pub(crate) salt: [u8; SESSION_SALT_LEN],
}

impl SessionKeys {
    #[cfg(test)]
    pub(crate) fn is_zeroed(&self) -> bool {
        self.enc_key.iter().all(|b| *b == 0)
            && self.auth_key.iter().all(|b| *b == 0)
            && self.salt.iter().all(|b| *b == 0)
    }
}
