//! Media library: resolves track identifiers to assets on disk

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Library identifier of one track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Asset resolution collaborator
///
/// Maps an identifier to a readable file. Anything that cannot be resolved is
/// `AssetNotFound`.
pub trait MediaLibrary: Send + Sync {
    fn resolve(&self, track_id: &TrackId) -> Result<PathBuf>;
}

/// Library rooted at a folder; identifiers are paths relative to the root
#[derive(Debug, Clone)]
pub struct FolderLibrary {
    root: PathBuf,
}

impl FolderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl MediaLibrary for FolderLibrary {
    fn resolve(&self, track_id: &TrackId) -> Result<PathBuf> {
        let relative = Path::new(track_id.as_str());

        // Identifiers stay inside the library
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::AssetNotFound(format!(
                "'{}' is not a library-relative identifier",
                track_id
            )));
        }

        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(Error::AssetNotFound(format!(
                "'{}' not found under {}",
                track_id,
                self.root.display()
            )));
        }

        Ok(path)
    }
}
