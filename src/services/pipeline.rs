use crate::models::{PersistedFile, UploadSession};
use crate::services::error::UploadError;
use crate::services::notification::NotificationChannel;
use crate::services::persister::Persister;
use crate::services::throttle::ProgressThrottle;
use bytes::Bytes;
use futures::stream::Stream;
use std::path::PathBuf;
use std::sync::Arc;

/// `source -> ProgressThrottle -> Persister` for a single file part.
pub struct UploadPipeline {
    connection_id: String,
    destination_root: PathBuf,
    throttle_interval: std::time::Duration,
    persister: Persister,
    notifier: Arc<dyn NotificationChannel>,
}

impl UploadPipeline {
    pub fn new(
        session: &UploadSession,
        persister: Persister,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            connection_id: session.connection_id.clone(),
            destination_root: session.destination_root.clone(),
            throttle_interval: session.throttle_interval,
            persister,
            notifier,
        }
    }

    /// Runs to completion. The persister pulls one chunk at a time, so the
    /// source is only read as fast as the destination accepts writes.
    pub async fn run<S>(self, filename: String, source: S) -> Result<PersistedFile, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Send,
    {
        let throttle = ProgressThrottle::new(
            filename.clone(),
            self.connection_id,
            self.throttle_interval,
            self.notifier,
        );

        match self
            .persister
            .persist(&self.destination_root, &filename, throttle.forward(source))
            .await
        {
            Ok(size) => {
                tracing::info!("File [{}] finished! ({} bytes)", filename, size);
                Ok(PersistedFile { filename, size })
            }
            Err(e) => {
                tracing::warn!("File [{}] failed: {}", filename, e);
                Err(e)
            }
        }
    }
}
