//! Persistent ZRTP identity: our ZID plus retained secrets per peer.
pub mod file_access;
pub mod identity_error;
pub mod identity_registry;
pub mod zid_record;
pub mod zid_store;

pub use file_access::{DirFileAccess, FileAccess};
pub use identity_error::IdentityError;
pub use identity_registry::IdentityRegistry;
pub use zid_record::ZidRecord;
pub use zid_store::ZidStore;

/// Length of a ZRTP identifier in bytes (96 bits).
pub const ZID_LEN: usize = 12;
pub type Zid = [u8; ZID_LEN];
