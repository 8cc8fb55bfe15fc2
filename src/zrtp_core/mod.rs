//! Reference ZRTP state machine behind [`ZrtpProtocolEngine`](crate::protocol::ZrtpProtocolEngine).
//!
//! Everything here works on message bodies only; packet framing and CRC
//! belong to [`crate::zrtp`].
pub mod algorithms;
pub mod confirm_cipher;
pub mod hash_chain;
pub mod kdf;
pub mod key_schedule;
pub mod messages;
pub mod sas;
pub mod zrtp_config;
pub mod zrtp_core_c;
pub mod zrtp_core_error;

pub use algorithms::{AuthTagAlgorithm, CipherAlgorithm, HashAlgorithm, KeyAgreement, SasAlgorithm};
pub use zrtp_config::{RetryPolicy, ZrtpConfig};
pub use zrtp_core_c::ZrtpCore;
pub use zrtp_core_error::ZrtpCoreError;
