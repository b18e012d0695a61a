use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;
use crate::handlers;

/// Create file manager routes
pub fn file_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        .route("/favicon.ico", get(handlers::favicon))
        // Browsing
        .route("/files", get(handlers::list_files))
        .route("/thumbnail", get(handlers::thumbnail))
        // Mutations
        .route("/upload", post(handlers::upload))
        .route("/create-folder", post(handlers::create_folder))
        .route("/rename-folder", post(handlers::rename_folder))
        .route("/delete-folder", delete(handlers::delete_folder))
        .route("/delete", delete(handlers::delete_file))
        // Downloads
        .route("/download", get(handlers::download))
        .route("/download-multiple", get(handlers::download_multiple))
}
