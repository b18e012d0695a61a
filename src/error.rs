use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("Path is outside the storage root")]
    PathTraversal,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Cannot operate on a directory: {0}")]
    IsDirectory(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("File is not an image or video: {0}")]
    NotMedia(String),

    #[error("Thumbnail generation failed: {0}")]
    Generation(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Request body too large")]
    BodyTooLarge,

    #[error("No files selected")]
    NoFilesSelected,

    #[error("Failed to create directory: {0}")]
    CreateDirFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = FileServerError> = std::result::Result<T, E>;

impl FileServerError {
    /// Stable machine-readable error kind.
    pub fn code(&self) -> &'static str {
        match self {
            FileServerError::PathTraversal => "PATH_TRAVERSAL",
            FileServerError::InvalidPath(_) => "INVALID_PATH",
            FileServerError::NotFound(_) => "NOT_FOUND",
            FileServerError::NotADirectory(_) => "NOT_A_DIRECTORY",
            FileServerError::IsDirectory(_) => "IS_DIRECTORY",
            FileServerError::NotAFile(_) => "NOT_A_FILE",
            FileServerError::AlreadyExists(_) => "ALREADY_EXISTS",
            FileServerError::NotMedia(_) => "NOT_MEDIA",
            FileServerError::Generation(_) => "GENERATION_FAILED",
            FileServerError::Upload(_) => "UPLOAD_FAILED",
            FileServerError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            FileServerError::BodyTooLarge => "BODY_TOO_LARGE",
            FileServerError::NoFilesSelected => "NO_FILES_SELECTED",
            FileServerError::CreateDirFailed(_) => "CREATE_DIR_FAILED",
            FileServerError::Io(_) => "IO_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FileServerError::PathTraversal => StatusCode::FORBIDDEN,
            FileServerError::NotFound(_) => StatusCode::NOT_FOUND,
            FileServerError::FileTooLarge { .. } | FileServerError::BodyTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            FileServerError::InvalidPath(_)
            | FileServerError::NotADirectory(_)
            | FileServerError::IsDirectory(_)
            | FileServerError::NotAFile(_)
            | FileServerError::AlreadyExists(_)
            | FileServerError::NotMedia(_)
            | FileServerError::Upload(_)
            | FileServerError::NoFilesSelected => StatusCode::BAD_REQUEST,
            FileServerError::Generation(_)
            | FileServerError::CreateDirFailed(_)
            | FileServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map an I/O failure on `path`, keeping not-found and already-exists distinct.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory => {
                FileServerError::NotFound(path.to_string())
            }
            std::io::ErrorKind::AlreadyExists => FileServerError::AlreadyExists(path.to_string()),
            _ => FileServerError::Io(err),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_bad_request() {
        assert_eq!(
            FileServerError::IsDirectory("a".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FileServerError::NotMedia("a.txt".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FileServerError::NoFilesSelected.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_generation_failure_is_server_error() {
        let err = FileServerError::Generation("ffmpeg exited".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "GENERATION_FAILED");
    }

    #[test]
    fn test_from_io_keeps_kind() {
        let err = FileServerError::from_io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "docs/a.txt",
        );
        assert!(matches!(err, FileServerError::NotFound(ref p) if p == "docs/a.txt"));

        let err = FileServerError::from_io(
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists"),
            "docs",
        );
        assert!(matches!(err, FileServerError::AlreadyExists(_)));

        let err = FileServerError::from_io(std::io::Error::other("boom"), "docs");
        assert!(matches!(err, FileServerError::Io(_)));
    }
}
