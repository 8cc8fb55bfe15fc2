use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::zrtp_core::kdf::sha256;

/// The H0..H3 hash chain of RFC 6189 §9. Each message reveals the preimage
/// of the value the previous one carried, so later messages authenticate
/// earlier ones.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HashChain {
    h: [[u8; 32]; 4],
}

impl HashChain {
    #[must_use]
    pub fn generate() -> Self {
        let mut h0 = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut h0);
        Self::from_h0(h0)
    }

    #[must_use]
    pub fn from_h0(h0: [u8; 32]) -> Self {
        let h1 = sha256(&[&h0]);
        let h2 = sha256(&[&h1]);
        let h3 = sha256(&[&h2]);
        Self { h: [h0, h1, h2, h3] }
    }

    #[must_use]
    pub fn h0(&self) -> &[u8; 32] {
        &self.h[0]
    }

    #[must_use]
    pub fn h1(&self) -> &[u8; 32] {
        &self.h[1]
    }

    #[must_use]
    pub fn h2(&self) -> &[u8; 32] {
        &self.h[2]
    }

    #[must_use]
    pub fn h3(&self) -> &[u8; 32] {
        &self.h[3]
    }
}

const CHAIN_LEN: usize = 4;

/// What we learned of the peer's chain so far.
#[derive(Default, Clone, Zeroize)]
pub struct PeerHashChain {
    h: [Option<[u8; 32]>; CHAIN_LEN],
}

impl PeerHashChain {
    #[must_use]
    pub fn get(&self, level: usize) -> Option<&[u8; 32]> {
        self.h.get(level).and_then(Option::as_ref)
    }

    /// Accepts `h` as the peer's H`level` if hashing it upwards reaches the
    /// nearest value already known. Levels in between are filled in. With
    /// nothing known above, the value is taken on trust.
    pub fn reveal(&mut self, level: usize, h: [u8; 32]) -> bool {
        if level >= CHAIN_LEN {
            return false;
        }
        if let Some(known) = self.h[level] {
            return known == h;
        }
        let mut filled = self.h;
        let mut cur = h;
        filled[level] = Some(cur);
        for l in level + 1..CHAIN_LEN {
            cur = sha256(&[&cur]);
            match self.h[l] {
                Some(known) if known == cur => break,
                Some(_) => return false,
                None => filled[l] = Some(cur),
            }
        }
        self.h = filled;
        true
    }
}
