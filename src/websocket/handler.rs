use std::sync::Arc;
use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::Response,
};
use tracing::{info, error};
use futures_util::{StreamExt, SinkExt};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::Outbox;


/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    info!("New WebSocket connection attempt");
    ws.max_message_size(app_state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {

    // Generate unique connection ID; it doubles as the user id once joined
    let connection_id = Uuid::new_v4().to_string();

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // Register the connection with a bounded outbox
    let (outbox, mut outbound) = Outbox::channel(app_state.config.outbox_capacity);
    let evicted = outbox.eviction_signal();
    app_state.router.connect(&connection_id, outbox).await;

    // Drain the outbox into the socket. Ends when the router drops the
    // outbox or the socket stops accepting writes.
    let writer_id = connection_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event for {}: {}", writer_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Read frames until the client goes away, the writer gives up, or the
    // router evicts us. A stalled client trips none of the first two.
    // Only the socket read is raced; a frame already being handled always
    // runs to completion, so no half-applied join can be left behind.
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    app_state.router.handle_frame(&connection_id, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("WebSocket error on {}: {}", connection_id, e);
                    break;
                }
            },
            _ = &mut send_task => break,
            _ = evicted.notified() => {
                info!("Closing evicted connection {}", connection_id);
                break;
            }
        }
    }

    // Abort first: a writer blocked on a full socket buffer never returns
    // on its own, and dropping it closes the socket.
    send_task.abort();
    app_state.router.disconnect(&connection_id).await;
    info!("WebSocket connection terminated");
}
