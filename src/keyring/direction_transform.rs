use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::keyring::session_key_material::SessionKeyMaterial;
use crate::log::log_sink::LogSink;
use crate::protocol::Direction;
use crate::srtp::{SrtcpContext, SrtpContext, SrtpError};

/// The SRTP and SRTCP contexts installed for one direction.
///
/// Installed transforms are shared as `Arc` snapshots; each packet
/// operation holds the context lock for its whole duration, so `close`
/// waits for an in-flight packet and every later call fails with
/// [`SrtpError::Closed`].
pub struct DirectionTransform {
    direction: Direction,
    rtp: Mutex<SrtpContext>,
    rtcp: Mutex<SrtcpContext>,
}

impl DirectionTransform {
    pub fn new(logger: Arc<dyn LogSink>, material: &SessionKeyMaterial) -> Result<Self, SrtpError> {
        let keys = material.endpoint_keys();
        let rtp = SrtpContext::new(Arc::clone(&logger), material.policy, &keys)?;
        let rtcp = SrtcpContext::new(logger, material.policy, &keys)?;
        Ok(Self {
            direction: material.direction,
            rtp: Mutex::new(rtp),
            rtcp: Mutex::new(rtcp),
        })
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn protect_rtp(&self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        self.rtp().protect(packet)
    }

    pub fn unprotect_rtp(&self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        self.rtp().unprotect(packet)
    }

    pub fn protect_rtcp(&self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        self.rtcp().protect(packet)
    }

    pub fn unprotect_rtcp(&self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        self.rtcp().unprotect(packet)
    }

    /// Zeroes both contexts' keys.
    pub fn close(&self) {
        self.rtp().close();
        self.rtcp().close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rtp().is_closed()
    }

    #[cfg(test)]
    pub(crate) fn keys_zeroed(&self) -> bool {
        self.rtp().keys_zeroed() && self.rtcp().keys_zeroed()
    }

    fn rtp(&self) -> MutexGuard<'_, SrtpContext> {
        self.rtp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rtcp(&self) -> MutexGuard<'_, SrtcpContext> {
        self.rtcp.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
