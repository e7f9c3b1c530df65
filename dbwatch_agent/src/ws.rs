//! WebSocket upgrade and per-connection push loop.
//!
//! Each event goes out as one text frame `{"event": "...", "data": ...}`.
//! Anything the client sends is ignored apart from close.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    // Registering queues the last-known snapshot for this client only.
    let mut sub = state.hub.register();
    let id = sub.id();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            ev = sub.recv() => {
                let Some(ev) = ev else {
                    // monitor shut down
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let text = match ev.envelope_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("failed to encode {} event: {e}", ev.name());
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("websocket subscriber {id} disconnected");
    // dropping `sub` unregisters it
}
