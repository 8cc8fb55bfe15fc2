use crate::protocol::{Direction, MessageCode, MessageSeverity};

/// Receiver of security events for one media stream.
///
/// Callbacks run on the media or timer thread that triggered them; anything
/// slow (UI dialogs) must be dispatched elsewhere. No engine lock is held
/// during a callback, so a listener may call back into the engine (for
/// example `stop_zrtp` when the peer turns out not to speak ZRTP).
/// All methods default to no-ops so listeners implement only what they show.
pub trait SecurityEventListener: Send + Sync {
    fn cipher_negotiated(&self, _cipher: &str) {}

    fn sas_computed(&self, _sas: &str, _verified: bool) {}

    fn security_established(&self, _direction: Direction, _cipher: &str) {}

    fn security_disabled(&self, _direction: Direction) {}

    /// Warning, Severe and Error messages. Info is filtered out.
    fn message(&self, _severity: MessageSeverity, _code: MessageCode) {}

    fn negotiation_failed(&self, _code: MessageCode) {}

    fn peer_does_not_support_protocol(&self) {}

    fn go_clear_confirmation_requested(&self) {}
}
