use crc::{CRC_32_ISCSI, Crc};

/// CRC-32C (Castagnoli), the checksum RFC 6189 puts on every ZRTP packet.
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[must_use]
pub fn zrtp_crc(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}
