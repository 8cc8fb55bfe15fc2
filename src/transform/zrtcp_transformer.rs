use std::sync::{Arc, atomic::Ordering};

use crate::rtp::RawPacket;
use crate::sink_debug;
use crate::transform::{engine_callbacks::EngineShared, packet_transformer::PacketTransformer};

/// SRTCP stage for the RTCP flow of a ZRTP-protected stream.
///
/// Uses the same keyring as the RTP engine, so SRTCP keys are installed and
/// torn down together with the SRTP keys of each direction.
#[derive(Clone)]
pub struct ZrtcpTransformer {
    shared: Arc<EngineShared>,
}

impl ZrtcpTransformer {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }
}

impl PacketTransformer for ZrtcpTransformer {
    fn transform(&self, packet: RawPacket) -> Option<RawPacket> {
        let Some(sender) = self.shared.keyring.sender() else {
            return Some(packet);
        };
        let mut bytes = packet.into_vec();
        match sender.protect_rtcp(&mut bytes) {
            Ok(()) => Some(RawPacket::from_vec(bytes)),
            Err(e) => {
                sink_debug!(self.shared.logger, "[SRTCP] protect failed, dropping: {}", e);
                None
            }
        }
    }

    fn reverse_transform(&self, packet: RawPacket) -> Option<RawPacket> {
        let keyring = &self.shared.keyring;
        let Some(receiver) = keyring.receiver() else {
            if keyring.mute_window().is_active()
                || (self.shared.closed.load(Ordering::SeqCst) && keyring.receiver_ever_installed())
            {
                return None;
            }
            return Some(packet);
        };
        let mut bytes = packet.into_vec();
        match receiver.unprotect_rtcp(&mut bytes) {
            Ok(()) => Some(RawPacket::from_vec(bytes)),
            Err(e) => {
                sink_debug!(self.shared.logger, "[SRTCP] unprotect failed, dropping: {}", e);
                None
            }
        }
    }
}
