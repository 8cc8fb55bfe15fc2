use std::sync::Arc;

use crate::identity::{FileAccess, IdentityRegistry, ZidStore};
use crate::log::log_sink::LogSink;

/// Collaborators shared by every engine of a process, passed in explicitly.
///
/// Clone it once per media stream: all clones share the same identity
/// registry, so the identity file is opened only once.
#[derive(Clone)]
pub struct ZrtpContext {
    pub logger: Arc<dyn LogSink>,
    pub identities: Arc<IdentityRegistry>,
    pub file_access: Option<Arc<dyn FileAccess>>,
}

impl ZrtpContext {
    #[must_use]
    pub fn new(logger: Arc<dyn LogSink>) -> Self {
        Self {
            logger,
            identities: Arc::new(IdentityRegistry::new()),
            file_access: None,
        }
    }

    /// Resolves identity file names through `access` instead of the
    /// home-directory fallback.
    #[must_use]
    pub fn with_file_access(mut self, access: Arc<dyn FileAccess>) -> Self {
        self.file_access = Some(access);
        self
    }

    /// A context whose identity is already open, e.g. an in-memory store.
    #[must_use]
    pub fn with_identity_store(logger: Arc<dyn LogSink>, store: Arc<ZidStore>) -> Self {
        Self {
            logger,
            identities: Arc::new(IdentityRegistry::with_store(store)),
            file_access: None,
        }
    }
}
