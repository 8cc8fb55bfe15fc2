use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use crate::config::home_dir;
use crate::identity::{
    file_access::FileAccess, identity_error::IdentityError, zid_store::ZidStore,
};
use crate::log::log_sink::LogSink;
use crate::{sink_info, sink_warn};

/// File name used when no [`FileAccess`] can resolve the requested name.
pub const FALLBACK_ZID_FILE: &str = ".rustyzrtp.zid";

/// Hands out one shared [`ZidStore`] per registry.
///
/// The first successful `open` wins: later calls get the same store even if
/// they ask for another file name. Pass one registry to every engine of a
/// process through the `ZrtpContext` instead of relying on a global.
#[derive(Default)]
pub struct IdentityRegistry {
    open: Mutex<Option<Arc<ZidStore>>>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that already holds `store`, e.g. an in-memory one for tests.
    #[must_use]
    pub fn with_store(store: Arc<ZidStore>) -> Self {
        Self {
            open: Mutex::new(Some(store)),
        }
    }

    pub fn open(
        &self,
        name: &str,
        access: Option<&dyn FileAccess>,
        logger: &dyn LogSink,
    ) -> Result<Arc<ZidStore>, IdentityError> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = open.as_ref() {
            return Ok(Arc::clone(store));
        }

        let path = match access.map(|a| a.private_persistent_file(name)) {
            Some(Ok(path)) => path,
            Some(Err(e)) => {
                sink_warn!(logger, "[Identity] cannot resolve {}: {}; using fallback", name, e);
                fallback_path()
            }
            None => fallback_path(),
        };
        let store = Arc::new(ZidStore::open(&path)?);
        sink_info!(logger, "[Identity] opened {}", path.display());
        *open = Some(Arc::clone(&store));
        Ok(store)
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<ZidStore>> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// `~/.rustyzrtp.zid`, or the working directory when there is no home.
fn fallback_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(FALLBACK_ZID_FILE)
}
