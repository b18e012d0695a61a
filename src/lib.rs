//! Browser file manager for a server-local storage directory.
//!
//! This crate provides the file manager operations, the thumbnail cache and
//! the HTTP routes in front of them. It can be used as a standalone binary or
//! embedded in another application via [`app`].

pub mod archive;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod operations;
pub mod paths;
pub mod routes;
pub mod storage;
pub mod thumbnail;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::FileServerError;
pub use operations::FileManager;

/// Request body allowance on top of the upload size limit for multipart
/// framing and form fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// File manager over the storage root
    pub files: FileManager,
    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState for the given root directory and default config.
    pub fn new(root_dir: PathBuf) -> Self {
        Self::with_config(root_dir, Config::default())
    }

    /// Create a new AppState for the given root directory and config.
    pub fn with_config(root_dir: PathBuf, config: Config) -> Self {
        Self {
            files: FileManager::new(root_dir, &config),
            config: Arc::new(config),
        }
    }

    /// Create a new AppState around an existing file manager.
    pub fn with_files(files: FileManager, config: Config) -> Self {
        Self {
            files,
            config: Arc::new(config),
        }
    }
}

/// Build the full HTTP application.
///
/// When `static_dir` is given, unmatched requests are served from it with an
/// `index.html` fallback.
pub fn app(state: AppState, static_dir: Option<&Path>) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new().merge(routes::file_routes());
    if let Some(dir) = static_dir {
        let assets = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        router = router.fallback_service(assets);
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
