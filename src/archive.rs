//! Zip downloads.
//!
//! The archive is written on a blocking worker into an anonymous temp file,
//! which is then streamed as the response body, so it is never held in
//! memory as a whole.

use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::tempfile;
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::{FileServerError, Result};
use crate::paths::PathResolver;
use crate::storage::Storage;

/// File name offered to the browser for multi-file downloads.
pub const ARCHIVE_NAME: &str = "files.zip";

/// A file to be stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// Name inside the archive (the file's base name).
    pub name: String,
    pub source: PathBuf,
}

/// Pick the archive members for the requested paths.
///
/// Unresolvable, missing and directory paths are skipped. Entries are named
/// by base name; when two requested files share one, the later wins.
pub async fn collect_entries(
    storage: &dyn Storage,
    resolver: &PathResolver,
    raw_paths: &[String],
) -> Result<Vec<ZipEntry>> {
    if raw_paths.is_empty() {
        return Err(FileServerError::NoFilesSelected);
    }

    let mut entries: Vec<ZipEntry> = Vec::with_capacity(raw_paths.len());
    for raw in raw_paths {
        let resolved = match resolver.resolve(raw) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("Skipping {:?} in zip: {}", raw, err);
                continue;
            }
        };
        if let Err(err) = resolver.verify(storage, &resolved).await {
            warn!("Skipping {:?} in zip: {}", raw, err);
            continue;
        }

        let meta = match storage.metadata(&resolved.absolute).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!("Skipping {} in zip: {}", resolved.relative, err);
                continue;
            }
        };
        if meta.is_dir {
            debug!("Skipping directory {} in zip", resolved.relative);
            continue;
        }

        let Some(name) = resolved.relative.file_name().map(str::to_string) else {
            continue;
        };
        entries.retain(|entry| entry.name != name);
        entries.push(ZipEntry {
            name,
            source: resolved.absolute,
        });
    }

    if entries.is_empty() {
        return Err(FileServerError::NoFilesSelected);
    }
    Ok(entries)
}

/// Write `entries` as a zip archive to an anonymous temp file and return it
/// rewound, along with its length.
pub async fn spool_entries(
    storage: Arc<dyn Storage>,
    entries: Vec<ZipEntry>,
) -> Result<(tokio::fs::File, u64)> {
    let handle = Handle::current();
    let (file, size) = tokio::task::spawn_blocking(move || {
        write_zip_tempfile_blocking(&entries, storage.as_ref(), &handle)
    })
    .await
    .map_err(|err| FileServerError::Io(std::io::Error::other(err.to_string())))??;

    Ok((tokio::fs::File::from_std(file), size))
}

fn zip_error(error: zip::result::ZipError) -> FileServerError {
    FileServerError::Io(std::io::Error::other(error.to_string()))
}

fn write_zip_tempfile_blocking(
    entries: &[ZipEntry],
    storage: &dyn Storage,
    handle: &Handle,
) -> Result<(std::fs::File, u64)> {
    let mut zip = ZipWriter::new(tempfile()?);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9))
        .unix_permissions(0o644);

    let mut written = 0;
    for entry in entries {
        // Files can vanish between selection and archiving.
        let reader = match handle.block_on(storage.open(&entry.source)) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("Skipping {} in zip: {}", entry.source.display(), err);
                continue;
            }
        };

        debug!("Adding to zip: {}", entry.source.display());
        zip.start_file(entry.name.as_str(), options)
            .map_err(zip_error)?;
        let mut input = SyncIoBridge::new_with_handle(reader, handle.clone());
        std::io::copy(&mut input, &mut zip)?;
        written += 1;
    }

    let mut file = zip.finish().map_err(zip_error)?;
    file.flush()?;

    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    info!("Built zip with {} entries ({} bytes)", written, size);

    Ok((file, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use zip::ZipArchive;

    fn paths(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    async fn spool(storage: Arc<dyn Storage>, entries: Vec<ZipEntry>) -> ZipArchive<Cursor<Vec<u8>>> {
        let (mut file, size) = spool_entries(storage, entries).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len() as u64, size);
        ZipArchive::new(Cursor::new(buf)).unwrap()
    }

    fn entry_text(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
        let mut content = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        content
    }

    #[tokio::test]
    async fn test_collect_rejects_empty_selection() {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new(temp.path());
        let result = collect_entries(&LocalStorage::new(), &resolver, &[]).await;
        assert!(matches!(result, Err(FileServerError::NoFilesSelected)));
    }

    #[tokio::test]
    async fn test_collect_skips_directories_missing_and_traversal() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("folder")).unwrap();
        std::fs::write(root.join("x.txt"), "x").unwrap();
        let resolver = PathResolver::new(root);

        let entries = collect_entries(
            &LocalStorage::new(),
            &resolver,
            &paths(&["folder", "missing.txt", "../etc/passwd", "x.txt"]),
        )
        .await
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "x.txt");

        let none = collect_entries(&LocalStorage::new(), &resolver, &paths(&["folder"])).await;
        assert!(matches!(none, Err(FileServerError::NoFilesSelected)));
    }

    #[tokio::test]
    async fn test_collect_last_duplicate_base_name_wins() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::write(root.join("a/report.txt"), "from a").unwrap();
        std::fs::write(root.join("b/report.txt"), "from b").unwrap();
        let resolver = PathResolver::new(root);

        let entries = collect_entries(
            &LocalStorage::new(),
            &resolver,
            &paths(&["a/report.txt", "b/report.txt"]),
        )
        .await
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, root.join("b/report.txt"));
    }

    #[tokio::test]
    async fn test_spool_writes_entries_by_base_name() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("x.txt"), "first").unwrap();
        std::fs::write(root.join("docs/y.txt"), "second".repeat(1000)).unwrap();
        let resolver = PathResolver::new(root);
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new());

        let entries = collect_entries(storage.as_ref(), &resolver, &paths(&["x.txt", "docs/y.txt"]))
            .await
            .unwrap();
        let mut archive = spool(storage, entries).await;

        assert_eq!(archive.len(), 2);
        assert_eq!(entry_text(&mut archive, "x.txt"), "first");
        assert_eq!(entry_text(&mut archive, "y.txt"), "second".repeat(1000));
        assert_eq!(
            archive.by_name("y.txt").unwrap().compression(),
            zip::CompressionMethod::Deflated
        );
    }

    #[tokio::test]
    async fn test_spool_skips_files_that_vanished() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("keep.txt"), "keep").unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new());

        let entries = vec![
            ZipEntry {
                name: "gone.txt".into(),
                source: root.join("gone.txt"),
            },
            ZipEntry {
                name: "keep.txt".into(),
                source: root.join("keep.txt"),
            },
        ];
        let mut archive = spool(storage, entries).await;

        assert_eq!(archive.len(), 1);
        assert_eq!(entry_text(&mut archive, "keep.txt"), "keep");
    }

    #[tokio::test]
    async fn test_spool_large_incompressible_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let payload: Vec<u8> = (0..256 * 1024usize)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        std::fs::write(root.join("big.bin"), &payload).unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new());

        let entries = vec![ZipEntry {
            name: "big.bin".into(),
            source: root.join("big.bin"),
        }];
        let mut archive = spool(storage, entries).await;

        let mut content = Vec::new();
        archive
            .by_name("big.bin")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, payload);
    }
}
