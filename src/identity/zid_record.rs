use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::{ZID_LEN, Zid};

const FLAG_RS1_VALID: u8 = 0x01;
const FLAG_RS2_VALID: u8 = 0x02;
const FLAG_SAS_VERIFIED: u8 = 0x04;

pub(crate) const RECORD_LEN: usize = ZID_LEN + 1 + 32 + 32 + 8;

/// What we remember about one peer: its two most recent retained secrets
/// and whether the user verified the SAS.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ZidRecord {
    pub peer_zid: Zid,
    pub rs1: Option<[u8; 32]>,
    pub rs2: Option<[u8; 32]>,
    pub sas_verified: bool,
    /// Seconds since the UNIX epoch.
    pub last_used: u64,
}

impl ZidRecord {
    #[must_use]
    pub fn new(peer_zid: Zid) -> Self {
        Self {
            peer_zid,
            rs1: None,
            rs2: None,
            sas_verified: false,
            last_used: 0,
        }
    }

    /// Shifts rs1 into rs2 and stores the fresh secret as rs1.
    pub fn set_new_rs1(&mut self, rs: [u8; 32], now_secs: u64) {
        self.rs2 = self.rs1.take();
        self.rs1 = Some(rs);
        self.last_used = now_secs;
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.peer_zid);
        let mut flags = 0u8;
        if self.rs1.is_some() {
            flags |= FLAG_RS1_VALID;
        }
        if self.rs2.is_some() {
            flags |= FLAG_RS2_VALID;
        }
        if self.sas_verified {
            flags |= FLAG_SAS_VERIFIED;
        }
        out.push(flags);
        out.extend_from_slice(&self.rs1.unwrap_or([0u8; 32]));
        out.extend_from_slice(&self.rs2.unwrap_or([0u8; 32]));
        out.extend_from_slice(&self.last_used.to_be_bytes());
    }

    /// Decodes one record; `bytes` must be exactly [`RECORD_LEN`] long.
    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != RECORD_LEN {
            return None;
        }
        let mut peer_zid = [0u8; ZID_LEN];
        peer_zid.copy_from_slice(&bytes[..ZID_LEN]);
        let flags = bytes[ZID_LEN];
        let secret_at = |off: usize| {
            let mut s = [0u8; 32];
            s.copy_from_slice(&bytes[off..off + 32]);
            s
        };
        let rs1_at = ZID_LEN + 1;
        let rs2_at = rs1_at + 32;
        Some(Self {
            peer_zid,
            rs1: (flags & FLAG_RS1_VALID != 0).then(|| secret_at(rs1_at)),
            rs2: (flags & FLAG_RS2_VALID != 0).then(|| secret_at(rs2_at)),
            sas_verified: flags & FLAG_SAS_VERIFIED != 0,
            last_used: BigEndian::read_u64(&bytes[rs2_at + 32..]),
        })
    }
}

impl fmt::Debug for ZidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZidRecord")
            .field("peer_zid", &hex::encode(self.peer_zid))
            .field("rs1", &self.rs1.is_some())
            .field("rs2", &self.rs2.is_some())
            .field("sas_verified", &self.sas_verified)
            .field("last_used", &self.last_used)
            .finish()
    }
}
