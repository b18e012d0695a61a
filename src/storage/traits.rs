//! Storage trait definitions.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

/// Streaming reader handed out by [`Storage::open`].
pub type StorageReader = Box<dyn AsyncRead + Send + Unpin>;

/// Whether an error means the path does not exist, including the case where
/// one of its ancestors is a regular file.
pub fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Metadata about an entry on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modified time.
    pub modified: Option<DateTime<Utc>>,
    /// Creation (birth) time, if the platform reports one.
    pub created: Option<DateTime<Utc>>,
    /// Whether this is a directory.
    pub is_dir: bool,
}

impl EntryMetadata {
    /// Create metadata for a file.
    pub fn file(size: u64) -> Self {
        Self {
            size,
            modified: None,
            created: None,
            is_dir: false,
        }
    }

    /// Create metadata for a directory.
    pub fn directory() -> Self {
        Self {
            size: 0,
            modified: None,
            created: None,
            is_dir: true,
        }
    }

    /// Set the modified time.
    pub fn with_modified(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.modified = time;
        self
    }

    /// Set the created time.
    pub fn with_created(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.created = time;
        self
    }
}

/// A direct child returned by [`Storage::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Narrow filesystem interface.
///
/// Paths are absolute and have already been resolved against the storage
/// root by the caller.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Get metadata for a path, following symlinks.
    async fn metadata(&self, path: &Path) -> io::Result<EntryMetadata>;

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        match self.metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if is_missing(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Resolve symlinks and relative components.
    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// List the direct children of a directory.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Read a file's contents.
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write data to a file, replacing it if present.
    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Open a file for streaming.
    async fn open(&self, path: &Path) -> io::Result<StorageReader>;

    /// Create a directory and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Move/rename an entry.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete a file.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Delete a directory and everything below it.
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Set unix permission bits. No-op where unsupported.
    async fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// All regular files below a directory, recursively.
    async fn walk_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_metadata_file() {
        let meta = EntryMetadata::file(100);
        assert_eq!(meta.size, 100);
        assert!(!meta.is_dir);
        assert!(meta.modified.is_none());
    }

    #[test]
    fn test_entry_metadata_directory() {
        let now = Utc::now();
        let meta = EntryMetadata::directory().with_modified(Some(now));
        assert_eq!(meta.size, 0);
        assert!(meta.is_dir);
        assert_eq!(meta.modified, Some(now));
    }

    #[test]
    fn test_is_missing() {
        assert!(is_missing(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_missing(&io::Error::from(io::ErrorKind::NotADirectory)));
        assert!(!is_missing(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
