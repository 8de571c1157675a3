use crate::AppState;
use crate::services::notification::{CONNECT_EVENT, NotificationHub};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Opens a push connection. The first frame carries the connection id the
/// client passes back as `socketId` when uploading.
pub async fn connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_connection(socket, hub))
}

async fn serve_connection(socket: WebSocket, hub: Arc<NotificationHub>) {
    let connection_id = Uuid::new_v4().to_string();
    let mut outbox = hub.register(&connection_id);
    let (mut sender, mut receiver) = socket.split();

    let hello = NotificationHub::envelope(CONNECT_EVENT, json!({ "id": connection_id }));
    if sender.send(Message::Text(hello)).await.is_ok() {
        loop {
            tokio::select! {
                outgoing = outbox.recv() => {
                    let Some(text) = outgoing else { break };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                incoming = receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    hub.unregister(&connection_id);
}
