use crate::services::error::UploadError;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Event name the browser client listens on for progress.
pub const UPLOAD_EVENT: &str = "file-upload";

/// Event sent once to a fresh push connection, carrying its id.
pub const CONNECT_EVENT: &str = "connect";

/// Frames queued per connection before new events are dropped.
pub const OUTBOX_CAPACITY: usize = 64;

/// Addressed, best-effort delivery of an event to one push connection.
///
/// Implementations must not block: the upload byte path calls this inline.
pub trait NotificationChannel: Send + Sync {
    fn send(&self, connection_id: &str, event: &str, payload: Value) -> Result<(), UploadError>;
}

/// Live push connections keyed by connection id.
#[derive(Default)]
pub struct NotificationHub {
    connections: DashMap<String, mpsc::Sender<String>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the receiving end of its outbox.
    /// A second registration under the same id replaces the first.
    pub fn register(&self, connection_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        if self
            .connections
            .insert(connection_id.to_string(), tx)
            .is_some()
        {
            tracing::warn!("Replaced existing push connection {}", connection_id);
        }
        tracing::info!(
            "New connection: [id: {}] ({} active)",
            connection_id,
            self.connections.len()
        );
        rx
    }

    pub fn unregister(&self, connection_id: &str) {
        if self.connections.remove(connection_id).is_some() {
            tracing::info!(
                "Connection closed: [id: {}] ({} active)",
                connection_id,
                self.connections.len()
            );
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn envelope(event: &str, payload: Value) -> String {
        json!({ "event": event, "data": payload }).to_string()
    }
}

impl NotificationChannel for NotificationHub {
    fn send(&self, connection_id: &str, event: &str, payload: Value) -> Result<(), UploadError> {
        let Some(outbox) = self.connections.get(connection_id) else {
            return Err(UploadError::NotificationDelivery(format!(
                "no connection with id {connection_id}"
            )));
        };

        outbox
            .try_send(Self::envelope(event, payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => UploadError::NotificationDelivery(format!(
                    "outbox for connection {connection_id} is full, event dropped"
                )),
                mpsc::error::TrySendError::Closed(_) => UploadError::NotificationDelivery(
                    format!("connection {connection_id} is closed"),
                ),
            })
    }
}
