use thiserror::Error;

use crate::identity::IdentityError;
use crate::zrtp_core::ZrtpCoreError;

/// Why [`initialize`](crate::transform::ZrtpTransformEngine::initialize)
/// could not bring the engine up.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("identity store: {0}")]
    Identity(#[from] IdentityError),
    #[error("protocol engine: {0}")]
    Core(#[from] ZrtpCoreError),
    #[error("cannot start timer thread: {0}")]
    Timer(#[from] std::io::Error),
    #[error("engine already closed")]
    Closed,
}
