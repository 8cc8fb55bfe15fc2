//! SRTP and SRTCP crypto contexts (RFC 3711): AES counter mode with
//! 128 or 256 bit keys, HMAC-SHA1 authentication and replay protection.
pub mod constants;
mod replay_window;
mod session_keys;
pub mod srtcp_context;
pub mod srtp_context;
pub mod srtp_endpoint_keys;
pub mod srtp_error;
pub mod srtp_policy;
mod utils;

pub use srtcp_context::SrtcpContext;
pub use srtp_context::SrtpContext;
pub use srtp_endpoint_keys::SrtpEndpointKeys;
pub use srtp_error::SrtpError;
pub use srtp_policy::{SrtpCipher, SrtpPolicy};
