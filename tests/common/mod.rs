//! Test utilities and common setup.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use nas_files::{AppState, Config, FileManager};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "nas-files-test-boundary";

/// A router over a fresh temporary storage root.
pub struct TestApp {
    _temp: TempDir,
    pub root: PathBuf,
    pub router: Router,
}

/// Raw response parts.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn test_app() -> TestApp {
    test_app_with_static(None).await
}

pub async fn test_app_with_static(static_dir: Option<&Path>) -> TestApp {
    let temp = TempDir::new().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let config = Config::default();

    let files = FileManager::new(root.clone(), &config);
    files.ensure_layout().await.unwrap();

    let router = nas_files::app(AppState::with_files(files, config), static_dir);
    TestApp {
        _temp: temp,
        root,
        router,
    }
}

impl TestApp {
    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(uri)
                .method(Method::DELETE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> TestResponse {
        self.send(
            Request::builder()
                .uri(uri)
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_multipart(&self, body: Vec<u8>) -> TestResponse {
        self.send(
            Request::builder()
                .uri("/upload")
                .method(Method::POST)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// List a directory and return the entry names.
    pub async fn names(&self, dir: &str) -> Vec<String> {
        let response = self
            .get(&format!("/files?path={}", urlencoding::encode(dir)))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        response
            .json()
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap().to_string())
            .collect()
    }
}

/// Builds a `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartBody {
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.buf
    }
}

/// Encode a solid-colour image.
pub fn image_bytes(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}
