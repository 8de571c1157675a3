use crate::AppState;
use crate::api::error::AppError;
use crate::models::{FileStatus, UploadSession};
use crate::services::coordinator::UploadCoordinator;
use crate::services::listing;
use crate::services::multipart::DecoderLimits;
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, header},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const UPLOAD_SUCCESS: &str = "Files uploaded with success!";

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Push connection that receives `file-upload` progress events
    #[serde(rename = "socketId")]
    pub socket_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub result: String,
}

#[utoipa::path(
    post,
    path = "/",
    params(UploadQuery),
    request_body(content = String, description = "multipart/form-data body with one or more files", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "All files stored", body = UploadResponse),
        (status = 400, description = "Malformed body, rejected filename or interrupted upload"),
        (status = 500, description = "Storage failure")
    ),
    tag = "files"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, AppError> {
    let connection_id = query
        .socket_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("socketId query parameter is required".to_string()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Content-Type header is required".to_string()))?
        .to_string();

    let session = UploadSession::new(
        connection_id,
        state.config.downloads_folder.clone(),
        state.config.progress_interval(),
    );
    let mut coordinator = UploadCoordinator::new(session, state.persister.clone(), state.hub.clone())
        .with_limits(DecoderLimits {
            max_header_bytes: state.config.max_header_bytes,
            part_channel_capacity: state.config.part_channel_capacity,
        });

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let report = coordinator.run(&content_type, stream).await?;

    tracing::info!(
        "Stored {} file(s), {} bytes",
        report.files.len(),
        report.total_bytes()
    );

    Ok(Json(UploadResponse {
        result: UPLOAD_SUCCESS.to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Files in the downloads folder", body = Vec<FileStatus>)
    ),
    tag = "files"
)]
pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileStatus>>, AppError> {
    let files = listing::list_status(&state.config.downloads_folder).await?;
    Ok(Json(files))
}
