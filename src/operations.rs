//! File manager operations.
//!
//! [`FileManager`] ties together path resolution, storage, the thumbnail
//! cache and the zip builder. Every operation resolves its raw user path
//! first, so a rejected path never reaches storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::config::Config;
use crate::error::{FileServerError, Result};
use crate::listing::{self, FileEntry, mime_type_for};
use crate::paths::{PathResolver, RelativePath, ResolvedPath};
use crate::storage::{EntryMetadata, LocalStorage, Storage, is_missing};
use crate::thumbnail::{MediaRenderer, ThumbnailCache, ThumbnailRenderer, ThumbnailSpec};

/// Permission bits applied to uploaded files.
pub const UPLOADED_FILE_MODE: u32 = 0o666;

/// Permission bits applied to created folders.
pub const CREATED_FOLDER_MODE: u32 = 0o777;

const MAX_FILENAME_BYTES: usize = 255;

/// Sanitize a client-supplied file name.
///
/// Control characters are dropped, separators and shell-hostile characters
/// become `_`, and leading/trailing dots and spaces are trimmed. Returns
/// `None` if nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    let sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if sanitized.is_empty() {
        return None;
    }

    if sanitized.len() <= MAX_FILENAME_BYTES {
        return Some(sanitized.to_string());
    }
    let mut end = MAX_FILENAME_BYTES;
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    Some(sanitized[..end].to_string())
}

/// An upload being spooled to a temp file under the upload directory.
///
/// The temp file is removed on drop unless the transfer is completed.
pub struct UploadTransfer {
    file: tokio::fs::File,
    temp: TempPath,
    file_name: String,
    size: u64,
    limit: u64,
}

impl UploadTransfer {
    /// Sanitized target file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Bytes received so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a chunk, enforcing the upload size limit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.size = self.size.saturating_add(chunk.len() as u64);
        if self.size > self.limit {
            warn!("Upload of {} exceeds limit of {} bytes", self.file_name, self.limit);
            return Err(FileServerError::FileTooLarge {
                size: self.size,
                limit: self.limit,
            });
        }
        self.file.write_all(chunk).await?;
        Ok(())
    }
}

/// A verified regular file ready to be served to the client.
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    /// Absolute path inside the storage root.
    pub path: PathBuf,
}

/// The file manager over one storage root.
#[derive(Clone)]
pub struct FileManager {
    storage: Arc<dyn Storage>,
    resolver: PathResolver,
    thumbnails: ThumbnailCache,
    max_upload_size: u64,
}

impl FileManager {
    /// File manager over the local filesystem, rendering thumbnails with
    /// `image` and `ffmpeg`.
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> Self {
        Self::with_parts(
            Arc::new(LocalStorage::new()),
            PathResolver::new(root),
            Arc::new(MediaRenderer::from_config(config)),
            config,
        )
    }

    pub fn with_parts(
        storage: Arc<dyn Storage>,
        resolver: PathResolver,
        renderer: Arc<dyn ThumbnailRenderer>,
        config: &Config,
    ) -> Self {
        let thumbnails = ThumbnailCache::new(
            storage.clone(),
            resolver.clone(),
            renderer,
            ThumbnailSpec::from_config(config),
        );
        Self {
            storage,
            resolver,
            thumbnails,
            max_upload_size: config.max_upload_size,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn thumbnails(&self) -> &ThumbnailCache {
        &self.thumbnails
    }

    /// Create the reserved thumbnail and upload directories.
    pub async fn ensure_layout(&self) -> Result<()> {
        self.thumbnails.ensure_dir().await?;

        let uploads = self.resolver.upload_dir();
        self.storage.create_dir_all(&uploads).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", uploads.display(), e);
            FileServerError::CreateDirFailed(uploads.display().to_string())
        })?;
        Ok(())
    }

    /// Resolve and check a path that must not escape the root via symlinks.
    async fn resolve_verified(&self, raw: &str) -> Result<ResolvedPath> {
        let resolved = self.resolver.resolve(raw)?;
        self.resolver.verify(self.storage.as_ref(), &resolved).await?;
        Ok(resolved)
    }

    async fn metadata_of(&self, path: &ResolvedPath) -> Result<EntryMetadata> {
        self.storage
            .metadata(&path.absolute)
            .await
            .map_err(|e| FileServerError::from_io(e, path.relative.as_str()))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.storage.exists(path).await?)
    }

    /// List a directory.
    pub async fn list(&self, raw: &str) -> Result<Vec<FileEntry>> {
        let dir = self.resolve_verified(raw).await?;
        listing::list(self.storage.as_ref(), &dir).await
    }

    /// JPEG thumbnail of a media file.
    pub async fn thumbnail(&self, raw: &str) -> Result<Vec<u8>> {
        let source = self.resolve_verified(raw).await?;
        self.thumbnails.get(&source).await
    }

    /// Start spooling an upload named `original_name` by the client.
    pub async fn begin_upload(&self, original_name: &str) -> Result<UploadTransfer> {
        let file_name = sanitize_filename(original_name).ok_or_else(|| {
            warn!("Rejected invalid filename: {:?}", original_name);
            FileServerError::Upload(format!("invalid filename: {:?}", original_name))
        })?;

        let spool_dir = self.resolver.upload_dir();
        self.storage.create_dir_all(&spool_dir).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", spool_dir.display(), e);
            FileServerError::CreateDirFailed(spool_dir.display().to_string())
        })?;

        let spool = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".upload-")
                .tempfile_in(&spool_dir)
        })
        .await
        .map_err(|err| FileServerError::Io(std::io::Error::other(err.to_string())))??;
        let (file, temp) = spool.into_parts();
        debug!("Spooling upload {} to {}", file_name, temp.display());

        Ok(UploadTransfer {
            file: tokio::fs::File::from_std(file),
            temp,
            file_name,
            size: 0,
            limit: self.max_upload_size,
        })
    }

    /// Move a fully received upload into `dir_raw`, creating the directory
    /// if needed and replacing any existing file of the same name.
    pub async fn complete_upload(
        &self,
        transfer: UploadTransfer,
        dir_raw: &str,
    ) -> Result<RelativePath> {
        let UploadTransfer {
            mut file,
            temp,
            file_name,
            size,
            ..
        } = transfer;
        file.flush().await?;
        drop(file);

        let dir = self.resolve_verified(dir_raw).await?;
        match self.storage.metadata(&dir.absolute).await {
            Ok(meta) if !meta.is_dir => {
                return Err(FileServerError::NotADirectory(dir.relative.to_string()));
            }
            Ok(_) => {}
            Err(err) if is_missing(&err) => {
                self.storage.create_dir_all(&dir.absolute).await.map_err(|e| {
                    error!("Failed to create directory {}: {}", dir.relative, e);
                    FileServerError::CreateDirFailed(dir.relative.to_string())
                })?;
            }
            Err(err) => return Err(err.into()),
        }

        let target = self.resolver.locate(dir.relative.join(&file_name)?)?;
        self.resolver.verify(self.storage.as_ref(), &target).await?;
        let replaced = match self.storage.metadata(&target.absolute).await {
            Ok(meta) if meta.is_dir => {
                return Err(FileServerError::IsDirectory(target.relative.to_string()));
            }
            Ok(_) => true,
            Err(_) => false,
        };

        self.storage
            .rename(&temp, &target.absolute)
            .await
            .map_err(|e| {
                error!("Failed to move upload into {}: {}", target.relative, e);
                FileServerError::Upload(format!("failed to store {}", file_name))
            })?;
        // The spool file now lives at the target; only forget the temp path.
        if let Err(err) = temp.keep() {
            warn!("Failed to release upload spool path: {}", err);
        }

        if let Err(err) = self.storage.set_mode(&target.absolute, UPLOADED_FILE_MODE).await {
            warn!("Failed to set permissions on {}: {}", target.relative, err);
        }

        if replaced {
            self.thumbnails.invalidate(&target.relative).await;
        }

        info!("Uploaded {} ({} bytes)", target.relative, size);
        Ok(target.relative)
    }

    /// Create a folder (and any missing parents).
    pub async fn create_folder(&self, raw: &str) -> Result<RelativePath> {
        let folder = self.resolve_verified(raw).await?;
        if folder.is_root() || self.exists(&folder.absolute).await? {
            return Err(FileServerError::AlreadyExists(folder.relative.to_string()));
        }

        self.storage
            .create_dir_all(&folder.absolute)
            .await
            .map_err(|e| {
                error!("Failed to create folder {}: {}", folder.relative, e);
                FileServerError::CreateDirFailed(folder.relative.to_string())
            })?;

        if let Err(err) = self.storage.set_mode(&folder.absolute, CREATED_FOLDER_MODE).await {
            warn!("Failed to set permissions on {}: {}", folder.relative, err);
        }

        info!("Created folder {}", folder.relative);
        Ok(folder.relative)
    }

    /// Rename or move a folder. The destination's parent must exist.
    pub async fn rename_folder(&self, old_raw: &str, new_raw: &str) -> Result<RelativePath> {
        let old = self.resolver.resolve(old_raw)?;
        let new = self.resolver.resolve(new_raw)?;
        if old.is_root() || new.is_root() {
            return Err(FileServerError::InvalidPath(
                "cannot rename the storage root".to_string(),
            ));
        }
        if new.relative.as_str().starts_with(&format!("{}/", old.relative.as_str())) {
            return Err(FileServerError::InvalidPath(format!(
                "cannot move {} into itself",
                old.relative
            )));
        }
        self.resolver.verify(self.storage.as_ref(), &old).await?;
        self.resolver.verify(self.storage.as_ref(), &new).await?;

        let meta = self.metadata_of(&old).await?;
        if !meta.is_dir {
            return Err(FileServerError::NotADirectory(old.relative.to_string()));
        }
        if old.relative == new.relative {
            return Ok(new.relative);
        }
        if self.exists(&new.absolute).await? {
            return Err(FileServerError::AlreadyExists(new.relative.to_string()));
        }

        let parent = self.resolver.locate(new.relative.parent())?;
        match self.storage.metadata(&parent.absolute).await {
            Ok(meta) if meta.is_dir => {}
            Ok(_) => return Err(FileServerError::NotADirectory(parent.relative.to_string())),
            Err(e) => return Err(FileServerError::from_io(e, parent.relative.as_str())),
        }

        self.thumbnails.invalidate_tree(&old).await;
        self.storage
            .rename(&old.absolute, &new.absolute)
            .await
            .map_err(|e| FileServerError::from_io(e, old.relative.as_str()))?;

        info!("Renamed folder {} to {}", old.relative, new.relative);
        Ok(new.relative)
    }

    /// Recursively delete a folder.
    pub async fn delete_folder(&self, raw: &str) -> Result<()> {
        let folder = self.resolver.resolve(raw)?;
        if folder.is_root() {
            warn!("Attempted to delete the storage root");
            return Err(FileServerError::InvalidPath(
                "cannot delete the storage root".to_string(),
            ));
        }
        self.resolver.verify(self.storage.as_ref(), &folder).await?;

        let meta = self.metadata_of(&folder).await?;
        if !meta.is_dir {
            return Err(FileServerError::NotADirectory(folder.relative.to_string()));
        }

        self.thumbnails.invalidate_tree(&folder).await;
        match self.storage.remove_dir_all(&folder.absolute).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("Folder {} vanished before removal", folder.relative);
            }
            Err(err) => return Err(err.into()),
        }

        info!("Deleted folder {}", folder.relative);
        Ok(())
    }

    /// Delete a single file and its thumbnail.
    pub async fn delete_file(&self, raw: &str) -> Result<()> {
        let file = self.resolve_verified(raw).await?;
        let meta = self.metadata_of(&file).await?;
        if meta.is_dir {
            return Err(FileServerError::IsDirectory(file.relative.to_string()));
        }

        self.storage
            .remove_file(&file.absolute)
            .await
            .map_err(|e| FileServerError::from_io(e, file.relative.as_str()))?;
        self.thumbnails.invalidate(&file.relative).await;

        info!("Deleted file {}", file.relative);
        Ok(())
    }

    /// Check that `raw` names a regular file inside the root and describe it
    /// for download.
    pub async fn prepare_download(&self, raw: &str) -> Result<Download> {
        let file = self.resolve_verified(raw).await?;
        let meta = self.metadata_of(&file).await?;
        if meta.is_dir {
            return Err(FileServerError::NotAFile(file.relative.to_string()));
        }

        Ok(Download {
            file_name: file.relative.file_name().unwrap_or("download").to_string(),
            mime_type: mime_type_for(&file.absolute),
            size: meta.size,
            path: file.absolute,
        })
    }

    /// Build a zip of the selected files. Returns the rewound archive and
    /// its length.
    pub async fn download_zip(&self, raw_paths: &[String]) -> Result<(tokio::fs::File, u64)> {
        let entries =
            archive::collect_entries(self.storage.as_ref(), &self.resolver, raw_paths).await?;
        info!("Zipping {} of {} requested files", entries.len(), raw_paths.len());
        archive::spool_entries(self.storage.clone(), entries).await
    }
}
