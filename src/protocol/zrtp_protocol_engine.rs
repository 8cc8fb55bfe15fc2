use crate::protocol::{
    multi_stream_params::MultiStreamParams, protocol_state::ProtocolState,
    zrtp_callback::ZrtpCallback,
};

/// A ZRTP state machine as seen from the media path.
///
/// Every method that may emit packets or events takes the host callback
/// explicitly; the engine never stores it.
pub trait ZrtpProtocolEngine: Send {
    /// Sends the first Hello and arms the Hello timer.
    fn start(&mut self, cb: &dyn ZrtpCallback);

    /// Cancels timers and turns off any installed secrets.
    fn stop(&mut self, cb: &dyn ZrtpCallback);

    /// Handles one validated message (preamble through MAC, no CRC).
    fn process_message(&mut self, message: &[u8], peer_ssrc: u32, cb: &dyn ZrtpCallback);

    fn process_timeout(&mut self, cb: &dyn ZrtpCallback);

    fn state(&self) -> ProtocolState;

    /// Treats the current packet as an implicit Conf2ACK (RFC 6189 §5.6).
    fn conf2_ack_secure(&mut self, cb: &dyn ZrtpCallback);

    fn sas_verified(&mut self);

    fn reset_sas_verified(&mut self);

    /// `"<version> <hex sha256 of our Hello>"`, as used in SDP `a=zrtp-hash`.
    fn hello_hash(&self) -> String;

    /// Version and hex Hello hash as separate strings.
    fn hello_hash_parts(&self) -> (String, String);

    fn peer_zid(&self) -> Option<[u8; 12]>;

    fn set_aux_secret(&mut self, secret: &[u8]);

    /// Asks the peer to drop to clear. Returns `false` outside the secure state
    /// or when clear mode is not allowed.
    fn request_go_clear(&mut self, cb: &dyn ZrtpCallback) -> bool;

    /// Confirms a pending peer GoClear.
    fn accept_go_clear(&mut self, cb: &dyn ZrtpCallback) -> bool;

    fn multi_stream_params(&self) -> Option<MultiStreamParams>;

    fn set_multi_stream_params(&mut self, params: &MultiStreamParams);

    fn is_multi_stream(&self) -> bool;
}
