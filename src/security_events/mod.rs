//! Turns state machine callbacks into the listener contract exposed to callers.
pub mod security_event_listener;
pub mod security_event_manager;

pub use crate::protocol::{MessageCode, MessageSeverity};
pub use security_event_listener::SecurityEventListener;
pub use security_event_manager::SecurityEventManager;
