//! Thumbnail cache.
//!
//! Thumbnails live as JPEG files in [`THUMBNAIL_DIR`](crate::paths::THUMBNAIL_DIR)
//! under the storage root, one per media file, named after the SHA-256 of the
//! file's normalized relative path. A thumbnail is generated on first request
//! and served verbatim afterwards. It is never revalidated against the source
//! file; it is only removed when the source is deleted (or its folder is
//! deleted or renamed).

pub mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{FileServerError, Result};
use crate::listing::mime_type_for;
use crate::paths::{PathResolver, RelativePath, ResolvedPath};
use crate::storage::Storage;

pub use render::{MediaRenderer, RenderError, ThumbnailRenderer, ThumbnailSpec};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache file name for a relative path.
pub fn cache_key(path: &RelativePath) -> String {
    let digest = Sha256::digest(path.as_str().as_bytes());
    format!("{}.jpg", hex::encode(digest))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn from_mime(mime_type: &str) -> Option<Self> {
        if mime_type.starts_with("image/") {
            Some(MediaKind::Image)
        } else if mime_type.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Get-or-generate store of thumbnails.
#[derive(Clone)]
pub struct ThumbnailCache {
    storage: Arc<dyn Storage>,
    resolver: PathResolver,
    renderer: Arc<dyn ThumbnailRenderer>,
    spec: ThumbnailSpec,
}

impl ThumbnailCache {
    pub fn new(
        storage: Arc<dyn Storage>,
        resolver: PathResolver,
        renderer: Arc<dyn ThumbnailRenderer>,
        spec: ThumbnailSpec,
    ) -> Self {
        Self {
            storage,
            resolver,
            renderer,
            spec,
        }
    }

    pub fn spec(&self) -> ThumbnailSpec {
        self.spec
    }

    /// Location of the cache entry for `path`.
    pub fn cache_path(&self, path: &RelativePath) -> PathBuf {
        self.resolver.thumbnail_dir().join(cache_key(path))
    }

    /// Create the cache directory if it is missing.
    pub async fn ensure_dir(&self) -> Result<()> {
        let dir = self.resolver.thumbnail_dir();
        self.storage.create_dir_all(&dir).await.map_err(|e| {
            error!("Failed to create thumbnail directory {}: {}", dir.display(), e);
            FileServerError::CreateDirFailed(dir.display().to_string())
        })
    }

    /// Return the JPEG thumbnail for `source`, generating it on a cache miss.
    pub async fn get(&self, source: &ResolvedPath) -> Result<Vec<u8>> {
        let meta = self
            .storage
            .metadata(&source.absolute)
            .await
            .map_err(|e| FileServerError::from_io(e, source.relative.as_str()))?;
        if meta.is_dir {
            return Err(FileServerError::IsDirectory(source.relative.to_string()));
        }

        let cache_path = self.cache_path(&source.relative);
        match self.storage.read(&cache_path).await {
            Ok(bytes) => {
                debug!("Serving cached thumbnail for {}", source.relative);
                return Ok(bytes);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    "Unreadable thumbnail {} for {}, regenerating: {}",
                    cache_path.display(),
                    source.relative,
                    err
                );
            }
        }

        let mime_type = mime_type_for(&source.absolute);
        let Some(kind) = MediaKind::from_mime(&mime_type) else {
            debug!("{} is not an image or video: {}", source.relative, mime_type);
            return Err(FileServerError::NotMedia(source.relative.to_string()));
        };

        info!("Generating {:?} thumbnail for {}", kind, source.relative);
        let rendered = self.render(source, kind).await.map_err(|e| {
            error!("Thumbnail error for {}: {}", source.relative, e);
            FileServerError::Generation(e.to_string())
        })?;

        self.store(&source.relative, &rendered).await?;

        if !self.storage.exists(&cache_path).await? {
            return Err(FileServerError::Generation(format!(
                "thumbnail for {} missing after generation",
                source.relative
            )));
        }

        Ok(rendered)
    }

    async fn render(
        &self,
        source: &ResolvedPath,
        kind: MediaKind,
    ) -> std::result::Result<Vec<u8>, RenderError> {
        let still = match kind {
            MediaKind::Image => self.storage.read(&source.absolute).await?,
            MediaKind::Video => self.renderer.extract_frame(&source.absolute).await?,
        };
        self.renderer.render_image(still, self.spec).await
    }

    /// Write a cache entry via a temp file and rename, so readers never see
    /// a partial JPEG.
    async fn store(&self, path: &RelativePath, data: &[u8]) -> Result<()> {
        self.ensure_dir().await?;

        let key = cache_key(path);
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = self.resolver.thumbnail_dir();
        let temp_path = dir.join(format!(".{}.{}-{}.partial", key, nonce, seq));
        let final_path = dir.join(&key);

        if let Err(err) = self.storage.write(&temp_path, data).await {
            let _ = self.storage.remove_file(&temp_path).await;
            return Err(FileServerError::Generation(format!(
                "failed to write thumbnail: {}",
                err
            )));
        }

        if let Err(err) = self.storage.rename(&temp_path, &final_path).await {
            let _ = self.storage.remove_file(&temp_path).await;
            return Err(FileServerError::Generation(format!(
                "failed to store thumbnail: {}",
                err
            )));
        }

        debug!("Stored thumbnail {} for {}", key, path);
        Ok(())
    }

    /// Remove the cache entry for `path`. Never fails; a missing entry is fine.
    pub async fn invalidate(&self, path: &RelativePath) {
        let cache_path = self.cache_path(path);
        match self.storage.remove_file(&cache_path).await {
            Ok(()) => debug!("Evicted thumbnail for {}", path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to evict thumbnail for {}: {}", path, err),
        }
    }

    /// Remove the cache entries of every file below `dir`.
    pub async fn invalidate_tree(&self, dir: &ResolvedPath) {
        let files = match self.storage.walk_files(&dir.absolute).await {
            Ok(files) => files,
            Err(err) => {
                warn!("Cannot walk {} to evict thumbnails: {}", dir.relative, err);
                return;
            }
        };

        for file in files {
            if let Some(relative) = self.resolver.relative_of(&file) {
                self.invalidate(&relative).await;
            }
        }
    }
}
