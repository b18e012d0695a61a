use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, Request, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::archive::ARCHIVE_NAME;
use crate::error::FileServerError;
use crate::listing::FileEntry;
use crate::operations::UploadTransfer;

/// Cache policy sent with thumbnails.
pub const THUMBNAIL_CACHE_CONTROL: &str = "private, max-age=3600";

/// Query parameters carrying a single path
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    /// Path relative to the storage root (defaults to the root)
    #[serde(default)]
    pub path: String,
}

/// Body of the create-folder request
#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    /// Percent-encoded folder path
    pub path: String,
}

/// Body of the rename-folder request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFolderRequest {
    /// Percent-encoded current path
    pub old_path: String,
    /// Percent-encoded new path
    pub new_path: String,
}

/// Query parameters for multi-file zip download
#[derive(Debug, Deserialize)]
pub struct DownloadMultipleQuery {
    /// Repeated `paths` values
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Response for successful mutations
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub root: String,
}

/// Decode a percent-encoded path sent in a JSON body.
fn decode_body_path(raw: &str) -> Result<String, FileServerError> {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| {
            warn!("Path is not valid percent-encoded UTF-8: {:?}", raw);
            FileServerError::InvalidPath(format!("malformed path encoding: {}", raw))
        })
}

fn multipart_error(err: MultipartError) -> FileServerError {
    warn!("Multipart error: {}", err);
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        FileServerError::BodyTooLarge
    } else {
        FileServerError::Upload(err.body_text())
    }
}

/// `Content-Disposition` for an attachment, with an ASCII fallback name and
/// the exact UTF-8 name.
fn attachment_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        root: state.files.resolver().root().display().to_string(),
    })
}

/// GET /favicon.ico
pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// GET /files - List a directory
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<FileEntry>>, FileServerError> {
    debug!("List request for {:?}", query.path);
    let entries = state.files.list(&query.path).await?;
    Ok(Json(entries))
}

/// GET /thumbnail - JPEG preview of an image or video
pub async fn thumbnail(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, FileServerError> {
    let jpeg = state.files.thumbnail(&query.path).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, THUMBNAIL_CACHE_CONTROL),
        ],
        jpeg,
    )
        .into_response())
}

/// POST /upload - Multipart upload with a `file` part and a `path` field
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, FileServerError> {
    let mut transfer: Option<UploadTransfer> = None;
    let mut target_dir = String::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" if transfer.is_some() => {
                warn!("Ignoring extra file field {:?}", field.file_name());
            }
            "file" => {
                let original = field.file_name().unwrap_or_default().to_string();
                let mut spool = state.files.begin_upload(&original).await?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    spool.write_chunk(&chunk).await?;
                }
                transfer = Some(spool);
            }
            "path" => {
                target_dir = field.text().await.map_err(multipart_error)?;
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let Some(transfer) = transfer else {
        warn!("Upload request without a file");
        return Err(FileServerError::Upload("no file uploaded".to_string()));
    };

    let stored = state.files.complete_upload(transfer, &target_dir).await?;
    Ok(MessageResponse::new(format!(
        "File uploaded successfully: {}",
        stored
    )))
}

/// POST /create-folder
pub async fn create_folder(
    State(state): State<AppState>,
    Json(request): Json<CreateFolderRequest>,
) -> Result<Json<MessageResponse>, FileServerError> {
    let path = decode_body_path(&request.path)?;
    let created = state.files.create_folder(&path).await?;
    Ok(MessageResponse::new(format!(
        "Folder created successfully: {}",
        created
    )))
}

/// POST /rename-folder
pub async fn rename_folder(
    State(state): State<AppState>,
    Json(request): Json<RenameFolderRequest>,
) -> Result<Json<MessageResponse>, FileServerError> {
    let old_path = decode_body_path(&request.old_path)?;
    let new_path = decode_body_path(&request.new_path)?;
    let renamed = state.files.rename_folder(&old_path, &new_path).await?;
    Ok(MessageResponse::new(format!(
        "Folder renamed successfully: {}",
        renamed
    )))
}

/// DELETE /delete-folder
pub async fn delete_folder(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<MessageResponse>, FileServerError> {
    state.files.delete_folder(&query.path).await?;
    Ok(MessageResponse::new("Folder deleted successfully"))
}

/// DELETE /delete - Delete a single file
pub async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<MessageResponse>, FileServerError> {
    state.files.delete_file(&query.path).await?;
    Ok(MessageResponse::new("File deleted successfully"))
}

/// GET /download - Serve a single file as an attachment
///
/// Byte ranges and conditional requests are honoured, so media can be
/// played and seeked straight from this endpoint.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    request: Request,
) -> Result<Response, FileServerError> {
    let download = state.files.prepare_download(&query.path).await?;
    info!("Downloading {} ({} bytes)", query.path, download.size);

    let response = ServeFile::new(&download.path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let mut response = response.map(Body::new);

    if response.status().is_success() {
        let disposition = HeaderValue::from_str(&attachment_disposition(&download.file_name))
            .map_err(|e| FileServerError::Io(std::io::Error::other(e)))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

/// GET /download-multiple - Send the selected files as a zip archive
pub async fn download_multiple(
    State(state): State<AppState>,
    axum_extra::extract::Query(query): axum_extra::extract::Query<DownloadMultipleQuery>,
) -> Result<Response, FileServerError> {
    let (archive, size) = state.files.download_zip(&query.paths).await?;

    let body = Body::from_stream(ReaderStream::new(archive));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", ARCHIVE_NAME),
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_body_path() {
        assert_eq!(decode_body_path("a%2Fb%20c").unwrap(), "a/b c");
        assert_eq!(decode_body_path("plain/path").unwrap(), "plain/path");
        assert_eq!(decode_body_path("caf%C3%A9").unwrap(), "café");
        assert!(matches!(
            decode_body_path("%FF%FE"),
            Err(FileServerError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"
        );
        let header = attachment_disposition("été \"1\".txt");
        assert!(header.starts_with("attachment; filename=\"_t_ _1_.txt\""));
        assert!(header.ends_with("filename*=UTF-8''%C3%A9t%C3%A9%20%221%22.txt"));
        assert!(header.is_ascii());
    }

    #[test]
    fn test_rename_request_uses_camel_case() {
        let request: RenameFolderRequest =
            serde_json::from_str(r#"{"oldPath":"a%2Fb","newPath":"a%2Fc"}"#).unwrap();
        assert_eq!(request.old_path, "a%2Fb");
        assert_eq!(request.new_path, "a%2Fc");
    }
}
