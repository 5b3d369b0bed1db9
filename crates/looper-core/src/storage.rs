//! Hierarchical file store used for track audio and sync files.
//!
//! All paths are relative to the storage root. [`FsStorage`] maps them onto a
//! directory of the host filesystem; [`MemoryStorage`] keeps everything in
//! memory and is used by tests and by hosts without a writable disk.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only.
    Read,
    /// Create or truncate, write only.
    WriteTruncate,
}

/// An open file handle. Closed when dropped.
pub trait StorageFile: Read + Write + Seek + Send {
    fn size(&self) -> io::Result<u64>;
}

pub trait Storage: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageFile>>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Check that the store is usable at all.
    fn probe(&self) -> io::Result<()>;
}

/// Storage rooted at a host directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl StorageFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl Storage for FsStorage {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageFile>> {
        let full = self.resolve(path);
        let file = match mode {
            OpenMode::Read => File::open(full)?,
            OpenMode::WriteTruncate => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(full)?,
        };
        Ok(Box::new(file))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn probe(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        if !fs::metadata(&self.root)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", self.root.display()),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryTree {
    files: HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>,
    dirs: HashSet<PathBuf>,
}

/// In-memory storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tree: Arc<Mutex<MemoryTree>>,
    unavailable: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `probe()` always fails, like a missing card.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Copy of a file's contents.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        let tree = self.tree.lock();
        tree.files.get(path).map(|data| data.lock().clone())
    }

    /// Replace a file's contents, creating it if needed.
    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let path = path.into();
        let mut tree = self.tree.lock();
        if let Some(parent) = path.parent() {
            insert_dirs(&mut tree.dirs, parent);
        }
        tree.files.insert(path, Arc::new(Mutex::new(data)));
    }

    fn parent_exists(tree: &MemoryTree, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(p) if p.as_os_str().is_empty() => true,
            Some(p) => tree.dirs.contains(p),
        }
    }
}

fn insert_dirs(dirs: &mut HashSet<PathBuf>, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        dirs.insert(ancestor.to_path_buf());
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree.lock();
        tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match self.tree.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageFile>> {
        let mut tree = self.tree.lock();
        let data = match mode {
            OpenMode::Read => tree
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?,
            OpenMode::WriteTruncate => {
                if !Self::parent_exists(&tree, path) {
                    return Err(io::ErrorKind::NotFound.into());
                }
                let data = Arc::new(Mutex::new(Vec::new()));
                tree.files.insert(path.to_path_buf(), Arc::clone(&data));
                data
            }
        };
        Ok(Box::new(MemoryFile {
            data,
            pos: 0,
            writable: mode == OpenMode::WriteTruncate,
        }))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        insert_dirs(&mut self.tree.lock().dirs, path);
        Ok(())
    }

    fn probe(&self) -> io::Result<()> {
        if self.unavailable {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "memory storage marked unavailable",
            ));
        }
        Ok(())
    }
}

/// Handle into a [`MemoryStorage`] file.
///
/// A removed file stays readable through handles opened before removal.
struct MemoryFile {
    data: Arc<Mutex<Vec<u8>>>,
    pos: u64,
    writable: bool,
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened read only",
            ));
        }
        let mut data = self.data.lock();
        let start = self.pos as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.lock().len() as i64;
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(off) => len + off,
            SeekFrom::Current(off) => self.pos as i64 + off,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl StorageFile for MemoryFile {
    fn size(&self) -> io::Result<u64> {
        Ok(self.data.lock().len() as u64)
    }
}
