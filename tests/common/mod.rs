use axum::Router;
use std::path::Path;
use std::sync::Arc;
use streaming_upload_backend::config::ServerConfig;
use streaming_upload_backend::services::notification::NotificationHub;
use streaming_upload_backend::services::persister::{LocalStore, Persister};
use streaming_upload_backend::{AppState, create_app};

pub const BOUNDARY: &str = "----rustformboundary7MA4YWxkTrZu0gW";

pub fn test_state(downloads: &Path) -> AppState {
    let config = ServerConfig {
        downloads_folder: downloads.to_path_buf(),
        progress_interval_ms: 0,
        ..ServerConfig::default()
    };

    AppState {
        persister: Persister::new(Arc::new(LocalStore::new())),
        hub: Arc::new(NotificationHub::new()),
        config,
    }
}

pub fn test_app(state: AppState) -> Router {
    create_app(state)
}

pub fn file_field(name: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
        Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    part.extend_from_slice(content);
    part.extend_from_slice(b"\r\n");
    part
}

pub fn text_field(name: &str, value: &str) -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"{name}\"\r\n\r\n\
        {value}\r\n"
    )
    .into_bytes()
}

pub fn closing() -> Vec<u8> {
    format!("--{BOUNDARY}--\r\n").into_bytes()
}

pub fn content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
