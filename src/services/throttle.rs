use crate::models::ProgressEvent;
use crate::services::error::UploadError;
use crate::services::notification::{NotificationChannel, UPLOAD_EVENT};
use bytes::Bytes;
use futures::stream::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-part sampling state. Never shared between parts or sessions.
#[derive(Debug, Default, Clone)]
pub struct ThrottleState {
    last_emit: Option<Instant>,
    bytes_processed: u64,
    last_reported: Option<u64>,
}

impl ThrottleState {
    /// Unset `last_emit` counts as infinitely long ago.
    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }
}

/// Pass-through stage that counts bytes and emits rate-limited progress events.
pub struct ProgressThrottle {
    filename: String,
    connection_id: String,
    interval: Duration,
    notifier: Arc<dyn NotificationChannel>,
    state: ThrottleState,
}

impl ProgressThrottle {
    pub fn new(
        filename: impl Into<String>,
        connection_id: impl Into<String>,
        interval: Duration,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            filename: filename.into(),
            connection_id: connection_id.into(),
            interval,
            notifier,
            state: ThrottleState::default(),
        }
    }

    /// Accounts for one chunk and emits if the interval has elapsed.
    pub fn observe(&mut self, chunk_len: usize) {
        self.state.bytes_processed += chunk_len as u64;

        let now = Instant::now();
        if !self.state.is_due(now, self.interval) {
            return;
        }

        self.state.last_emit = Some(now);
        self.emit();
    }

    /// End-of-stream flush: report the exact total unless it was already reported.
    pub fn finish(&mut self) {
        if self.state.last_reported != Some(self.state.bytes_processed) {
            self.emit();
        }
    }

    fn emit(&mut self) {
        let event = ProgressEvent {
            filename: self.filename.clone(),
            bytes_processed: self.state.bytes_processed,
        };
        self.state.last_reported = Some(event.bytes_processed);

        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Could not encode progress for {}: {}", self.filename, e);
                return;
            }
        };

        match self
            .notifier
            .send(&self.connection_id, UPLOAD_EVENT, payload)
        {
            Ok(()) => tracing::debug!(
                "File [{}] got {} bytes to {}",
                self.filename,
                event.bytes_processed,
                self.connection_id
            ),
            Err(e) => tracing::warn!(
                "Progress for [{}] not delivered to {}: {}",
                self.filename,
                self.connection_id,
                e
            ),
        }
    }

    /// Wraps `source`, yielding every chunk unchanged and in order.
    ///
    /// Nothing is buffered here: the next chunk is pulled from `source` only
    /// when the consumer asks for it. The final flush runs only if `source`
    /// ends cleanly.
    pub fn forward<S>(mut self, source: S) -> impl Stream<Item = Result<Bytes, UploadError>> + Send
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Send,
    {
        async_stream::try_stream! {
            for await chunk in source {
                let chunk = chunk?;
                self.observe(chunk.len());
                yield chunk;
            }
            self.finish();
        }
    }
}
