//! The seam between the media path and a ZRTP state machine.
//!
//! [`ZrtpProtocolEngine`] is what the transform engine drives;
//! [`ZrtpCallback`] is what the state machine calls back into. Neither side
//! knows the other's internals.
pub mod message_code;
pub mod multi_stream_params;
pub mod protocol_state;
pub mod role;
pub mod srtp_secrets;
pub mod zrtp_callback;
pub mod zrtp_error_code;
pub mod zrtp_protocol_engine;

pub use message_code::{MessageCode, MessageSeverity};
pub use multi_stream_params::MultiStreamParams;
pub use protocol_state::ProtocolState;
pub use role::{Direction, Role};
pub use srtp_secrets::SrtpSecrets;
pub use zrtp_callback::ZrtpCallback;
pub use zrtp_error_code::ZrtpErrorCode;
pub use zrtp_protocol_engine::ZrtpProtocolEngine;
