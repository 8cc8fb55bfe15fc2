/// z-base-32 alphabet used by the `B32 ` SAS type.
const B32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Renders the leftmost 20 bits of the SAS value as four base-32 characters.
#[must_use]
pub fn render_b32(sas_hash: &[u8]) -> String {
    let mut bits = 0u32;
    for (i, b) in sas_hash.iter().take(4).enumerate() {
        bits |= u32::from(*b) << (24 - 8 * i);
    }
    (0..4)
        .map(|i| {
            let idx = (bits >> (27 - 5 * i)) & 0x1F;
            char::from(B32_ALPHABET[idx as usize])
        })
        .collect()
}
