/// What the packet path currently does with media, derived from the engine
/// state, the installed transforms and the mute window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaPathState {
    /// Inbound media is dropped, outbound passes in clear.
    Muted,
    Plaintext,
    /// ZRTP is running; each direction uses whatever transform is installed.
    Negotiating,
    /// Both directions are encrypted.
    Secure,
    /// Inert after `close`.
    Closed,
}
