//! Directory listing.

use std::cmp::Ordering;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FileServerError, Result};
use crate::paths::ResolvedPath;
use crate::storage::Storage;

/// MIME type reported for directories.
pub const DIRECTORY_TYPE: &str = "directory";

/// MIME type reported when the extension is not recognized.
pub const UNKNOWN_TYPE: &str = "unknown";

/// One row of a directory listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub is_media: bool,
}

/// Guess a MIME type from the file extension.
pub fn mime_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string())
}

/// Whether a MIME type denotes something the thumbnail engine can preview.
pub fn is_media_type(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type.starts_with("video/")
}

/// Listing order: directories first, then case-insensitive by name, ties
/// broken by the exact name.
fn listing_order(a: &FileEntry, b: &FileEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// List the direct children of `dir`.
///
/// Hidden entries (leading `.`) are skipped, as are entries whose metadata
/// cannot be read.
pub async fn list(storage: &dyn Storage, dir: &ResolvedPath) -> Result<Vec<FileEntry>> {
    let meta = storage
        .metadata(&dir.absolute)
        .await
        .map_err(|e| FileServerError::from_io(e, dir.relative.as_str()))?;
    if !meta.is_dir {
        return Err(FileServerError::NotADirectory(dir.relative.to_string()));
    }

    let children = storage.read_dir(&dir.absolute).await?;
    debug!("Listing {} ({} raw entries)", dir.relative, children.len());

    let mut entries = Vec::with_capacity(children.len());
    for child in children {
        if child.name.starts_with('.') {
            continue;
        }

        let meta = match storage.metadata(&child.path).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!("Skipping {}: cannot read metadata: {}", child.path.display(), err);
                continue;
            }
        };

        let mime_type = if meta.is_dir {
            DIRECTORY_TYPE.to_string()
        } else {
            mime_type_for(&child.path)
        };

        entries.push(FileEntry {
            is_media: is_media_type(&mime_type),
            name: child.name,
            is_directory: meta.is_dir,
            size: if meta.is_dir { 0 } else { meta.size },
            modified: meta.modified,
            created: meta.created,
            mime_type,
        });
    }

    entries.sort_by(listing_order);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathResolver;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn names(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(mime_type_for(Path::new("a/photo.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("clip.mp4")), "video/mp4");
        assert_eq!(mime_type_for(Path::new("noext")), UNKNOWN_TYPE);
        assert!(is_media_type("image/png"));
        assert!(is_media_type("video/webm"));
        assert!(!is_media_type("text/plain"));
        assert!(!is_media_type(DIRECTORY_TYPE));
    }

    #[tokio::test]
    async fn test_list_skips_hidden_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join(".thumbnails")).unwrap();
        std::fs::create_dir_all(root.join("zeta")).unwrap();
        std::fs::create_dir_all(root.join("Alpha")).unwrap();
        std::fs::write(root.join(".hidden"), "h").unwrap();
        std::fs::write(root.join("b.txt"), "bb").unwrap();
        std::fs::write(root.join("A.txt"), "a").unwrap();
        std::fs::write(root.join("a.txt"), "a").unwrap();

        let resolver = PathResolver::new(root);
        let dir = resolver.resolve("").unwrap();
        let entries = list(&LocalStorage::new(), &dir).await.unwrap();

        assert_eq!(names(&entries), vec!["Alpha", "zeta", "A.txt", "a.txt", "b.txt"]);
        assert!(entries.iter().all(|e| !e.name.starts_with('.')));
    }

    #[tokio::test]
    async fn test_list_entry_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("vacation/album")).unwrap();
        std::fs::write(root.join("vacation/photo.jpg"), vec![0u8; 1234]).unwrap();
        std::fs::write(root.join("vacation/notes.txt"), "notes").unwrap();

        let resolver = PathResolver::new(root);
        let dir = resolver.resolve("vacation").unwrap();
        let entries = list(&LocalStorage::new(), &dir).await.unwrap();

        let album = &entries[0];
        assert_eq!(album.name, "album");
        assert!(album.is_directory);
        assert_eq!(album.size, 0);
        assert_eq!(album.mime_type, DIRECTORY_TYPE);
        assert!(!album.is_media);

        let photo = entries.iter().find(|e| e.name == "photo.jpg").unwrap();
        assert_eq!(photo.size, 1234);
        assert_eq!(photo.mime_type, "image/jpeg");
        assert!(photo.is_media);
        assert!(photo.modified.is_some());

        let notes = entries.iter().find(|e| e.name == "notes.txt").unwrap();
        assert!(!notes.is_media);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_skips_entries_without_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("ok.txt"), "ok").unwrap();
        std::os::unix::fs::symlink(root.join("missing-target"), root.join("dangling")).unwrap();

        let resolver = PathResolver::new(root);
        let entries = list(&LocalStorage::new(), &resolver.resolve("").unwrap())
            .await
            .unwrap();
        assert_eq!(names(&entries), vec!["ok.txt"]);
    }

    #[tokio::test]
    async fn test_list_errors() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("file.txt"), "x").unwrap();
        let resolver = PathResolver::new(root);
        let storage = LocalStorage::new();

        let missing = resolver.resolve("nope").unwrap();
        assert!(matches!(
            list(&storage, &missing).await,
            Err(FileServerError::NotFound(_))
        ));

        let file = resolver.resolve("file.txt").unwrap();
        assert!(matches!(
            list(&storage, &file).await,
            Err(FileServerError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_file_entry_wire_format() {
        let entry = FileEntry {
            name: "photo.jpg".into(),
            is_directory: false,
            size: 10,
            modified: None,
            created: None,
            mime_type: "image/jpeg".into(),
            is_media: true,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["isDirectory"], false);
        assert_eq!(json["isMedia"], true);
        assert_eq!(json["type"], "image/jpeg");
        assert!(json["modified"].is_null());
    }
}
