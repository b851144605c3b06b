//! WebSocket handler for live snapshots

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/live
pub async fn live_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_live(socket, state))
}

/// Forward broadcaster frames to one WebSocket client
async fn handle_live(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();

    let subscription = match state.broadcaster.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Live subscription refused: {}", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let id = subscription.id;
    let mut frames = subscription.frames;
    info!("Live client {} connected", id);

    // Ends when the client goes away or the broadcaster releases us
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                return;
            }
        }

        debug!("Broadcaster closed, closing socket");
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
        _ = state.terminate.cancelled() => {
            debug!("Listener terminating, dropping live client {}", id);
            send_task.abort();
            recv_task.abort();
        }
    }

    let _ = state.broadcaster.unsubscribe(id).await;
    info!("Live client {} disconnected", id);
}
