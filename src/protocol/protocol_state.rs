/// States of the ZRTP state machine (RFC 6189 §4 and §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// Not started, or back here after a failure or stop.
    Initial,
    /// Sending Hello, waiting for the peer's Hello and HelloACK.
    Detect,
    /// Got HelloACK, still waiting for the peer's Hello.
    AckDetected,
    /// Acknowledged the peer's Hello, waiting for its HelloACK or Commit.
    AckSent,
    CommitSent,
    WaitDhPart2,
    WaitConfirm1,
    WaitConfirm2,
    WaitConfAck,
    Secure,
    WaitClearAck,
    /// Secure session dropped to clear after a GoClear exchange.
    Clear,
    WaitErrorAck,
}
