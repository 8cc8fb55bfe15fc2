use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque parameters exported by a secure master stream so further streams
/// of the same call can skip the DH exchange. Contains the session key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MultiStreamParams(Vec<u8>);

impl MultiStreamParams {
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MultiStreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiStreamParams({} bytes)", self.0.len())
    }
}
