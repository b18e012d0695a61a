//! Local filesystem storage implementation.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use super::{DirEntry, EntryMetadata, Storage, StorageReader};

/// Local filesystem storage implementation.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

/// Convert system time to chrono DateTime.
fn system_time_to_chrono(time: SystemTime) -> Option<DateTime<Utc>> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()))
}

fn join_error(err: tokio::task::JoinError) -> io::Error {
    io::Error::other(err.to_string())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let meta = fs::metadata(path).await?;

        let entry = if meta.is_dir() {
            EntryMetadata::directory()
        } else {
            EntryMetadata::file(meta.len())
        };

        Ok(entry
            .with_modified(meta.modified().ok().and_then(system_time_to_chrono))
            .with_created(meta.created().ok().and_then(system_time_to_chrono)))
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path(),
            });
        }

        Ok(entries)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        fs::write(path, data).await?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn open(&self, path: &Path) -> io::Result<StorageReader> {
        let file = fs::File::open(path).await?;
        Ok(Box::new(file))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to).await?;
        debug!("Renamed {} to {}", from.display(), to.display());
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path).await
    }

    #[cfg(unix)]
    async fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }

    #[cfg(not(unix))]
    async fn set_mode(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    async fn walk_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect()
        })
        .await
        .map_err(join_error)
    }
}
