//! Negotiated SRTP keys and the live per-direction transforms built from them.
pub mod direction_transform;
pub mod mute_window;
pub mod secrets_keyring;
pub mod session_key_material;

pub use direction_transform::DirectionTransform;
pub use mute_window::MuteWindow;
pub use secrets_keyring::SecretsKeyring;
pub use session_key_material::SessionKeyMaterial;
