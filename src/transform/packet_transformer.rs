use crate::rtp::RawPacket;

/// A stage in the packet path. `None` means the packet is consumed or
/// dropped and must not go any further.
pub trait PacketTransformer: Send + Sync {
    /// Outbound: application to wire.
    fn transform(&self, packet: RawPacket) -> Option<RawPacket>;

    /// Inbound: wire to application.
    fn reverse_transform(&self, packet: RawPacket) -> Option<RawPacket>;
}
