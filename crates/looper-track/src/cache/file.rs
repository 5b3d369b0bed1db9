//! Path-bound file handle shared by the record and play caches.

use crate::{Error, Result};
use looper_core::{OpenMode, Storage, StorageFile};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum FileState {
    Unbound,
    Bound(PathBuf),
    Open {
        path: PathBuf,
        file: Box<dyn StorageFile>,
    },
}

/// A storage path plus a lazily opened handle.
///
/// Replacing the state drops any open handle, so the file is closed on every
/// path out of the cache, error returns included.
pub struct FileCache {
    storage: Arc<dyn Storage>,
    state: FileState,
}

impl FileCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            state: FileState::Unbound,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            FileState::Unbound => None,
            FileState::Bound(path) | FileState::Open { path, .. } => Some(path),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, FileState::Open { .. })
    }

    /// Whether the backing file exists in storage.
    pub fn exists(&self) -> bool {
        self.path().is_some_and(|p| self.storage.exists(p))
    }

    /// Rebind without touching storage.
    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.state = match path {
            Some(path) => FileState::Bound(path),
            None => FileState::Unbound,
        };
    }

    /// Close the handle but keep the path.
    pub fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, FileState::Unbound);
        self.state = match state {
            FileState::Open { path, .. } | FileState::Bound(path) => FileState::Bound(path),
            FileState::Unbound => FileState::Unbound,
        };
    }

    /// Open the bound path if it is not open yet.
    pub(crate) fn open(&mut self, mode: OpenMode) -> Result<&mut dyn StorageFile> {
        if let FileState::Bound(path) = &self.state {
            if mode == OpenMode::WriteTruncate {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    self.storage.create_dir_all(parent)?;
                }
            }
            let file = self.storage.open(path, mode).map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
            let path = path.clone();
            self.state = FileState::Open { path, file };
        }
        match &mut self.state {
            FileState::Open { file, .. } => Ok(file.as_mut()),
            _ => Err(Error::PathUnbound),
        }
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut dyn StorageFile> {
        match &mut self.state {
            FileState::Open { file, .. } => Some(file.as_mut()),
            _ => None,
        }
    }

    /// Close and delete the backing file. Returns whether a file was removed.
    pub fn remove_file(&mut self) -> Result<bool> {
        self.close();
        match self.path() {
            Some(path) if self.storage.exists(path) => {
                self.storage.remove(path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

impl fmt::Debug for FileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCache")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_core::MemoryStorage;
    use std::io::Write;

    #[test]
    fn test_state_transitions() {
        let storage = Arc::new(MemoryStorage::new());
        let mut cache = FileCache::new(storage.clone());
        assert!(cache.path().is_none());
        assert!(matches!(
            cache.open(OpenMode::Read),
            Err(Error::PathUnbound)
        ));

        cache.set_path(Some("00/1.A".into()));
        assert_eq!(cache.path(), Some(Path::new("00/1.A")));
        assert!(!cache.is_open());

        // parent directory created on demand
        cache
            .open(OpenMode::WriteTruncate)
            .unwrap()
            .write_all(&[1, 2])
            .unwrap();
        assert!(cache.is_open());
        assert!(storage.exists(Path::new("00")));

        cache.close();
        assert!(!cache.is_open());
        assert!(cache.exists());

        assert!(cache.remove_file().unwrap());
        assert!(!cache.exists());
        assert!(!cache.remove_file().unwrap());
    }

    #[test]
    fn test_rebind_closes_handle() {
        let storage = Arc::new(MemoryStorage::new());
        let mut cache = FileCache::new(storage);
        cache.set_path(Some("a".into()));
        cache.open(OpenMode::WriteTruncate).unwrap();
        cache.set_path(Some("b".into()));
        assert!(!cache.is_open());
        assert_eq!(cache.path(), Some(Path::new("b")));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let storage = Arc::new(MemoryStorage::new());
        let mut cache = FileCache::new(storage);
        cache.set_path(Some("missing".into()));
        assert!(matches!(
            cache.open(OpenMode::Read),
            Err(Error::Open { .. })
        ));
        assert!(!cache.is_open());
    }
}
