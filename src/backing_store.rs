//! The pluggable blob store the swap space pages node bytes through.
//!
//! Every object is addressed by an (id, version) pair. `allocate` reserves a
//! fresh slot for a version that doesn't exist yet, `put` commits bytes to an
//! allocated slot, `get` returns the bytes most recently `put` for that exact
//! pair, and `deallocate` frees a version that will never be read again. The
//! swap space never reuses a version number for a given id, so a `get` is
//! always either "the bytes that were put" or an I/O error; it never
//! observes a half-written value.

use crate::error::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub trait BackingStore: Send + Sync + 'static {
    fn allocate(&self, id: u64, version: u64) -> Result<()>;
    fn get(&self, id: u64, version: u64) -> Result<Vec<u8>>;
    fn put(&self, id: u64, version: u64, data: &[u8]) -> Result<()>;
    fn deallocate(&self, id: u64, version: u64) -> Result<()>;
}

/// An in-memory backing store, mainly for tests and ephemeral trees.
#[derive(Default)]
pub struct MemBackingStore {
    objects: Mutex<HashMap<(u64, u64), Vec<u8>>>,
}

impl MemBackingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for MemBackingStore {
    fn allocate(&self, id: u64, version: u64) -> Result<()> {
        self.objects.lock().insert((id, version), Vec::new());
        Ok(())
    }

    fn get(&self, id: u64, version: u64) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .get(&(id, version))
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::BackingStoreIo,
                    format!("no such object ({id}, {version})"),
                )
            })
    }

    fn put(&self, id: u64, version: u64, data: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .insert((id, version), data.to_vec());
        Ok(())
    }

    fn deallocate(&self, id: u64, version: u64) -> Result<()> {
        self.objects.lock().remove(&(id, version));
        Ok(())
    }
}

/// A one-file-per-object disk backing store, rooted at a directory given at
/// construction time. Filenames are `<id>_<version>`, following the
/// reference store's naming convention.
pub struct FileBackingStore {
    root: PathBuf,
}

impl FileBackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(FileBackingStore { root })
    }

    fn path_for(&self, id: u64, version: u64) -> PathBuf {
        self.root.join(format!("{id}_{version}"))
    }
}

fn io_err(path: &Path, e: io::Error) -> Error {
    Error::new(
        ErrorKind::BackingStoreIo,
        format!("{}: {e}", path.display()),
    )
}

impl BackingStore for FileBackingStore {
    fn allocate(&self, id: u64, version: u64) -> Result<()> {
        let path = self.path_for(id, version);
        fs::write(&path, []).map_err(|e| io_err(&path, e))
    }

    fn get(&self, id: u64, version: u64) -> Result<Vec<u8>> {
        let path = self.path_for(id, version);
        fs::read(&path).map_err(|e| io_err(&path, e))
    }

    fn put(&self, id: u64, version: u64, data: &[u8]) -> Result<()> {
        let path = self.path_for(id, version);
        fs::write(&path, data).map_err(|e| io_err(&path, e))
    }

    fn deallocate(&self, id: u64, version: u64) -> Result<()> {
        let path = self.path_for(id, version);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_roundtrips() {
        let store = MemBackingStore::new();
        store.allocate(1, 1).unwrap();
        store.put(1, 1, b"hello").unwrap();
        assert_eq!(store.get(1, 1).unwrap(), b"hello");
        store.deallocate(1, 1).unwrap();
        assert!(store.get(1, 1).is_err());
    }

    #[test]
    fn file_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackingStore::new(dir.path()).unwrap();
        store.allocate(7, 3).unwrap();
        store.put(7, 3, b"payload").unwrap();
        assert_eq!(store.get(7, 3).unwrap(), b"payload");
        store.deallocate(7, 3).unwrap();
        assert!(store.get(7, 3).is_err());
    }

    #[test]
    fn file_store_distinguishes_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackingStore::new(dir.path()).unwrap();
        store.allocate(1, 1).unwrap();
        store.put(1, 1, b"v1").unwrap();
        store.allocate(1, 2).unwrap();
        store.put(1, 2, b"v2").unwrap();
        assert_eq!(store.get(1, 1).unwrap(), b"v1");
        assert_eq!(store.get(1, 2).unwrap(), b"v2");
    }
}
