use rand::Rng;
use rand::rngs::OsRng;

/// 16-bit wrapping counter for outgoing ZRTP packets.
///
/// Seeded once from the OS RNG in `1..0x8000`, so the first packets never
/// start at zero and there is room before the first wrap.
#[derive(Debug)]
pub struct ZrtpSequence {
    next: u16,
}

impl ZrtpSequence {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: OsRng.gen_range(1..0x8000),
        }
    }

    #[must_use]
    pub fn starting_at(seq: u16) -> Self {
        Self { next: seq }
    }

    pub fn next_seq(&mut self) -> u16 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}

impl Default for ZrtpSequence {
    fn default() -> Self {
        Self::new()
    }
}
