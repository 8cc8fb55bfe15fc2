/// Lifecycle of one media stream's ZRTP engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Constructed, stopped, or back to clear after a failure or GoClear.
    Idle,
    Negotiating,
    /// Secrets are installed and announced for both directions.
    Secure,
    /// A GoClear was sent or received and is not settled yet.
    GoClearRequested,
    Closed,
}

impl EngineState {
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == EngineState::Closed
    }
}
