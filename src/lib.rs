pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::handlers;
use crate::config::ServerConfig;
use crate::services::notification::NotificationHub;
use crate::services::persister::Persister;
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::files::upload_files,
        handlers::files::list_files,
        handlers::health::health_check,
    ),
    components(
        schemas(
            handlers::files::UploadResponse,
            handlers::health::HealthResponse,
            models::FileStatus,
            models::ProgressEvent,
        )
    ),
    tags(
        (name = "files", description = "Streaming upload and listing endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Shared by every request so writers to one file are serialized.
    pub persister: Persister,
    pub hub: Arc<NotificationHub>,
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.max_body_size;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route(
            "/",
            get(handlers::files::list_files).post(handlers::files::upload_files),
        )
        .route("/health", get(handlers::health::health_check))
        .route("/ws", get(handlers::notifications::connect))
        // Raw body streams bypass DefaultBodyLimit
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .with_state(state)
}
