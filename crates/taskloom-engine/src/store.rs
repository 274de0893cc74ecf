//! The snapshot persistence capability.
//!
//! Byte-level storage for the graph snapshot. Both directions may fail
//! non-fatally: a failed read means starting empty, a failed write is
//! logged and retried at the next shutdown.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable byte storage for one snapshot.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when no snapshot exists yet.
    fn read(&self) -> io::Result<Option<Vec<u8>>>;
    fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

/// File-backed store with an atomic rewrite: the snapshot is written to
/// a temp path in the same directory, fsynced, then renamed over the
/// old file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the stored bytes.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.bytes.lock().expect("store lock poisoned").clone())
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        *self.bytes.lock().expect("store lock poisoned") = Some(bytes.to_vec());
        Ok(())
    }
}
