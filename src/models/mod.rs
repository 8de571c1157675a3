use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// One upload request: where progress goes and where bytes land.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub connection_id: String,
    pub destination_root: std::path::PathBuf,
    pub throttle_interval: Duration,
}

impl UploadSession {
    pub fn new(
        connection_id: impl Into<String>,
        destination_root: impl Into<std::path::PathBuf>,
        throttle_interval: Duration,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            destination_root: destination_root.into(),
            throttle_interval,
        }
    }
}

/// Payload of the `file-upload` push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProgressEvent {
    pub filename: String,
    #[serde(rename = "processAlready")]
    pub bytes_processed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PersistedFile {
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct UploadReport {
    pub files: Vec<PersistedFile>,
}

impl UploadReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub size: String,
    pub last_modified: DateTime<Utc>,
    pub owner: String,
    pub file: String,
}
