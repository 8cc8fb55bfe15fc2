use zeroize::{Zeroize, ZeroizeOnDrop};

/// Master key and salt for one direction. Wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SrtpEndpointKeys {
    pub master_key: Vec<u8>,
    pub master_salt: Vec<u8>,
}

impl SrtpEndpointKeys {
    #[must_use]
    pub fn new(master_key: &[u8], master_salt: &[u8]) -> Self {
        Self {
            master_key: master_key.to_vec(),
            master_salt: master_salt.to_vec(),
        }
    }
}

impl std::fmt::Debug for SrtpEndpointKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrtpEndpointKeys")
            .field("master_key_len", &self.master_key.len())
            .field("master_salt_len", &self.master_salt.len())
            .finish()
    }
}
