//! Minimal WebSocket client helpers for following an agent's event stream.

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::types::AgentEvent;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Connect to the agent and return the WS stream
pub async fn connect(url: &str) -> anyhow::Result<WsStream> {
    let (ws, _) = connect_async(url).await?;
    Ok(ws)
}

pub fn decode(text: &str) -> Option<AgentEvent> {
    serde_json::from_str::<AgentEvent>(text).ok()
}

// Next decodable event; None when the agent closes the stream
pub async fn next_event(ws: &mut WsStream) -> Option<AgentEvent> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(ev) = decode(&text) {
                    return Some(ev);
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}
