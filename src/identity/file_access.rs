use std::fs;
use std::path::PathBuf;

use crate::identity::identity_error::IdentityError;

/// Maps a caller-supplied file name to an absolute path for private,
/// persistent data.
pub trait FileAccess: Send + Sync {
    fn private_persistent_file(&self, name: &str) -> Result<PathBuf, IdentityError>;
}

/// Keeps every file under one base directory, created on demand.
#[derive(Debug, Clone)]
pub struct DirFileAccess {
    base: PathBuf,
}

impl DirFileAccess {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl FileAccess for DirFileAccess {
    fn private_persistent_file(&self, name: &str) -> Result<PathBuf, IdentityError> {
        if name.is_empty() || name.contains("..") {
            return Err(IdentityError::Unresolvable(name.to_string()));
        }
        fs::create_dir_all(&self.base).map_err(|source| IdentityError::Io {
            path: self.base.clone(),
            source,
        })?;
        let path = self.base.join(name);
        Ok(std::path::absolute(&path).unwrap_or(path))
    }
}
