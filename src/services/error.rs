use thiserror::Error;

/// Failures of the ingestion pipeline.
///
/// `Clone` because a decoder failure is delivered both to the part that was
/// being streamed and to the coordinator driving the decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("Path traversal rejected for filename {0:?}")]
    PathTraversal(String),

    #[error("Filename {0:?} appears more than once in this upload")]
    DuplicateFilename(String),

    #[error("Failed to persist {filename} after {written} bytes: {reason}")]
    PersistFailure {
        filename: String,
        written: u64,
        reason: String,
    },

    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    #[error("Upload source interrupted: {0}")]
    SourceInterrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        UploadError::MalformedMultipart(msg.into())
    }

    /// Failures that come from the client's framing or connection rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UploadError::MalformedMultipart(_)
                | UploadError::PathTraversal(_)
                | UploadError::DuplicateFilename(_)
                | UploadError::SourceInterrupted(_)
        )
    }
}
