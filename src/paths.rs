//! Mapping of user-supplied relative paths onto the storage root.
//!
//! Resolution is lexical: a path is normalized into a [`RelativePath`] and
//! joined onto the root without touching the filesystem. Operations that act
//! on existing entries additionally call [`PathResolver::verify`], which
//! canonicalizes through the storage seam to catch symlinks pointing outside
//! the root.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use tracing::{error, warn};

use crate::error::{FileServerError, Result};
use crate::storage::{Storage, is_missing};

/// Directory under the root holding generated thumbnails.
pub const THUMBNAIL_DIR: &str = ".thumbnails";

/// Directory under the root used to spool incoming uploads.
pub const UPLOAD_DIR: &str = ".uploads";

const RESERVED_DIRS: [&str; 2] = [THUMBNAIL_DIR, UPLOAD_DIR];

/// Normalized, slash-separated path relative to the storage root.
///
/// Never has leading or trailing slashes, empty segments, `.` or `..`.
/// The empty path denotes the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath(String);

impl RelativePath {
    /// The storage root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize a raw user path.
    ///
    /// Backslashes are treated as separators, repeated and surrounding
    /// slashes are collapsed, `.` segments are dropped. `..`, NUL bytes and
    /// drive prefixes are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            warn!("Path contains null byte: {:?}", raw);
            return Err(FileServerError::PathTraversal);
        }

        let unified = raw.replace('\\', "/");
        let mut segments = Vec::new();

        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    warn!("Path traversal attempt detected: parent directory (..) in {:?}", raw);
                    return Err(FileServerError::PathTraversal);
                }
                s if segments.is_empty() && is_drive_prefix(s) => {
                    warn!("Drive prefix in relative path: {:?}", raw);
                    return Err(FileServerError::PathTraversal);
                }
                s => segments.push(s),
            }
        }

        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> RelativePath {
        match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// Append a single already-sanitized name.
    pub fn join(&self, name: &str) -> Result<RelativePath> {
        if self.is_root() {
            Self::parse(name)
        } else {
            Self::parse(&format!("{}/{}", self.0, name))
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("/")
        } else {
            f.write_str(&self.0)
        }
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// A user path together with its location on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub relative: RelativePath,
    pub absolute: PathBuf,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.relative.is_root()
    }
}

/// Resolves relative paths against a fixed storage root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn thumbnail_dir(&self) -> PathBuf {
        self.root.join(THUMBNAIL_DIR)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.root.join(UPLOAD_DIR)
    }

    /// Resolve a raw user path. Performs no filesystem access.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath> {
        let relative = RelativePath::parse(raw)?;

        if let Some(first) = relative.segments().next() {
            if RESERVED_DIRS.contains(&first) {
                warn!("Rejected access to reserved directory: {:?}", raw);
                return Err(FileServerError::InvalidPath(format!(
                    "{} is reserved",
                    first
                )));
            }
        }

        self.locate(relative)
    }

    /// Join an already-normalized path onto the root.
    pub fn locate(&self, relative: RelativePath) -> Result<ResolvedPath> {
        let mut absolute = self.root.clone();
        for segment in relative.segments() {
            absolute.push(segment);
        }

        // Segments are validated, but a platform may still interpret one
        // specially (e.g. a Windows verbatim prefix).
        if !absolute.starts_with(&self.root)
            || absolute
                .strip_prefix(&self.root)
                .map(|rest| {
                    rest.components()
                        .any(|c| !matches!(c, Component::Normal(_)))
                })
                .unwrap_or(true)
        {
            error!(
                "Path resolution resulted in path outside root: {:?}",
                absolute
            );
            return Err(FileServerError::PathTraversal);
        }

        Ok(ResolvedPath { relative, absolute })
    }

    /// Relative path of an absolute location under the root.
    ///
    /// Always uses `/` as separator.
    pub fn relative_of(&self, absolute: &Path) -> Option<RelativePath> {
        let relative = absolute.strip_prefix(&self.root).ok()?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                Component::CurDir => continue,
                _ => return None,
            }
        }

        Some(RelativePath(parts.join("/")))
    }

    /// Verify that an entry, or its nearest existing ancestor when it does
    /// not exist yet, is really located inside the root once symlinks are
    /// followed.
    pub async fn verify(&self, storage: &dyn Storage, path: &ResolvedPath) -> Result<()> {
        let canonical_root = storage.canonicalize(&self.root).await?;

        let mut current = path.absolute.as_path();
        let canonical = loop {
            match storage.canonicalize(current).await {
                Ok(canonical) => break canonical,
                Err(err) if is_missing(&err) => {}
                Err(err) => return Err(err.into()),
            }
            match current.parent() {
                Some(parent) if parent.starts_with(&self.root) => current = parent,
                _ => break canonical_root.clone(),
            }
        };

        if !canonical.starts_with(&canonical_root) {
            warn!(
                "Symlink escape attempt: {} resolved to {:?} which is outside {:?}",
                path.relative, canonical, canonical_root
            );
            return Err(FileServerError::PathTraversal);
        }

        Ok(())
    }
}
