use std::time::Duration;

use crate::protocol::{
    message_code::{MessageCode, MessageSeverity},
    role::Direction,
    srtp_secrets::SrtpSecrets,
};

/// Everything a ZRTP state machine needs from its host.
///
/// Calls arrive on whichever thread drove the state machine (media receive
/// thread or the timer thread). Implementations must not block and must not
/// call back into the engine that is invoking them.
pub trait ZrtpCallback: Send + Sync {
    /// Frames `message` as a ZRTP packet and puts it on the wire.
    fn send_data_zrtp(&self, message: &[u8]) -> bool;

    /// Installs keys for one direction. Returning `false` aborts negotiation.
    fn srtp_secrets_ready(&self, secrets: &SrtpSecrets, direction: Direction) -> bool;

    /// Both directions are protected. `sas` is `None` for multi-stream sessions.
    fn srtp_secrets_on(&self, cipher: &str, sas: Option<&str>, verified: bool);

    fn srtp_secrets_off(&self, direction: Direction);

    /// Arms the single retransmission timer, replacing any armed one.
    fn activate_timer(&self, delay: Duration);

    fn cancel_timer(&self);

    fn send_info(&self, severity: MessageSeverity, code: MessageCode);

    fn negotiation_failed(&self, severity: MessageSeverity, code: MessageCode);

    /// Hello went unanswered for the whole retry budget.
    fn not_supported_by_other(&self);

    /// An authenticated GoClear arrived and awaits the user's decision.
    fn handle_go_clear(&self);
}
