use crate::models::{PersistedFile, UploadReport, UploadSession};
use crate::services::error::UploadError;
use crate::services::multipart::{DecoderLimits, MultipartDecoder, boundary_from_content_type};
use crate::services::notification::NotificationChannel;
use crate::services::persister::{Persister, safe_relative_path};
use crate::services::pipeline::UploadPipeline;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Awaiting,
    Decoding,
    AllPartsSettled,
    Finished,
    Failed(UploadError),
}

impl CoordinatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Finished | CoordinatorState::Failed(_))
    }
}

/// Drives one upload request: decodes the body and runs one pipeline per file part.
pub struct UploadCoordinator {
    session: UploadSession,
    persister: Persister,
    notifier: Arc<dyn NotificationChannel>,
    limits: DecoderLimits,
    state: CoordinatorState,
}

/// Owns the coordinator state while `run` is in flight. A `run` future that
/// is dropped before settling leaves the session `Failed`.
struct StateGuard<'a> {
    state: &'a mut CoordinatorState,
}

impl StateGuard<'_> {
    fn set(&mut self, next: CoordinatorState) {
        *self.state = next;
    }

    fn fail(&mut self, error: UploadError) -> UploadError {
        *self.state = CoordinatorState::Failed(error.clone());
        error
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            *self.state = CoordinatorState::Failed(UploadError::SourceInterrupted(
                "upload abandoned before all parts settled".to_string(),
            ));
        }
    }
}

impl UploadCoordinator {
    /// `session.destination_root` is where every part of this request lands.
    pub fn new(
        session: UploadSession,
        persister: Persister,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            session,
            persister,
            notifier,
            limits: DecoderLimits::default(),
            state: CoordinatorState::Awaiting,
        }
    }

    pub fn with_limits(mut self, limits: DecoderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    /// Attaches the request body and runs the session to a terminal state.
    ///
    /// Pipelines start as soon as their part's headers are decoded. The
    /// session settles once the decoder has reached the end of the body and
    /// every pipeline has completed. The first pipeline failure to complete
    /// decides the outcome, unless decoding itself failed. A filename seen
    /// twice in one body fails the session; the repeated part is skipped
    /// without touching the destination.
    pub async fn run<S>(&mut self, content_type: &str, body: S) -> Result<UploadReport, UploadError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin,
    {
        if self.state != CoordinatorState::Awaiting {
            return Err(UploadError::Internal(
                "upload coordinator cannot be reused".to_string(),
            ));
        }

        let mut state = StateGuard {
            state: &mut self.state,
        };

        let boundary = match boundary_from_content_type(content_type) {
            Ok(boundary) => boundary,
            Err(e) => return Err(state.fail(e)),
        };

        state.set(CoordinatorState::Decoding);
        let mut decoder = MultipartDecoder::new(body, &boundary, self.limits);

        // Detached handles: dropping this set does not abort a pipeline, so
        // an interrupted part still gets to remove its partial file.
        let mut pending: FuturesUnordered<JoinHandle<Result<PersistedFile, UploadError>>> =
            FuturesUnordered::new();
        let mut destinations = HashSet::new();
        let mut first_failure = None;

        let decode_error = loop {
            match decoder.next_part().await {
                Ok(Some(part)) => {
                    tracing::debug!(
                        "Part [{}] field={} type={:?}",
                        part.filename,
                        part.field_name,
                        part.content_type
                    );

                    // Unsafe names are left for the persister to reject.
                    if let Ok(relative) = safe_relative_path(&part.filename) {
                        if !destinations.insert(relative) {
                            tracing::warn!(
                                "Skipping repeated file [{}] for connection {}",
                                part.filename,
                                self.session.connection_id
                            );
                            first_failure
                                .get_or_insert(UploadError::DuplicateFilename(part.filename));
                            continue;
                        }
                    }

                    let pipeline = UploadPipeline::new(
                        &self.session,
                        self.persister.clone(),
                        self.notifier.clone(),
                    );
                    pending.push(tokio::spawn(pipeline.run(part.filename, part.body)));
                }
                Ok(None) => break None,
                Err(e) => {
                    tracing::error!(
                        "Decoding failed for connection {}: {}",
                        self.session.connection_id,
                        e
                    );
                    break Some(e);
                }
            }
        };
        drop(decoder);

        let mut files = Vec::new();
        while let Some(joined) = pending.next().await {
            let outcome = joined
                .unwrap_or_else(|e| Err(UploadError::Internal(format!("pipeline task failed: {e}"))));
            match outcome {
                Ok(file) => files.push(file),
                Err(e) => {
                    first_failure.get_or_insert(e);
                }
            }
        }
        state.set(CoordinatorState::AllPartsSettled);

        match decode_error.or(first_failure) {
            None => {
                state.set(CoordinatorState::Finished);
                tracing::info!(
                    "Upload for connection {} finished: {} file(s)",
                    self.session.connection_id,
                    files.len()
                );
                Ok(UploadReport { files })
            }
            Some(e) => Err(state.fail(e)),
        }
    }
}
