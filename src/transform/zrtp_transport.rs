use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use crate::log::log_sink::LogSink;
use crate::sink_warn;

/// Where framed ZRTP packets go. Failures are reported, never raised: the
/// protocol engine recovers through its own retransmissions.
pub trait ZrtpTransport: Send + Sync {
    fn send_raw_bytes(&self, bytes: &[u8]) -> bool;
}

/// Sends ZRTP packets on the media stream's own UDP socket.
pub struct UdpZrtpTransport {
    sock: Arc<UdpSocket>,
    peer: SocketAddr,
    logger: Arc<dyn LogSink>,
}

impl UdpZrtpTransport {
    #[must_use]
    pub fn new(sock: Arc<UdpSocket>, peer: SocketAddr, logger: Arc<dyn LogSink>) -> Self {
        Self { sock, peer, logger }
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl ZrtpTransport for UdpZrtpTransport {
    fn send_raw_bytes(&self, bytes: &[u8]) -> bool {
        match self.sock.send_to(bytes, self.peer) {
            Ok(n) if n == bytes.len() => true,
            Ok(n) => {
                sink_warn!(self.logger, "[ZRTP] short send to {}: {} of {}", self.peer, n, bytes.len());
                false
            }
            Err(e) => {
                sink_warn!(self.logger, "[ZRTP] send to {} failed: {}", self.peer, e);
                false
            }
        }
    }
}
