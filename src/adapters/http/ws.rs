use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use tokio::sync::broadcast::error::RecvError;

use crate::adapters::http::state::HttpState;
use crate::domain::stream::WsFrameMetaMessage;

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<HttpState>) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// Por cada frame: un texto JSON `{type: "frame", meta}` seguido del JPEG en binario.
async fn handle_socket(mut socket: WebSocket, st: HttpState) {
    let mut rx = st.pipeline.subscribe();

    loop {
        let (meta, jpeg) = match rx.recv().await {
            Ok(frame) => frame,
            // Cliente lento: se saltan frames viejos.
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "websocket retrasado");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let json = serde_json::to_string(&WsFrameMetaMessage { r#type: "frame".into(), meta }).unwrap_or_default();

        if socket.send(Message::Text(json.into())).await.is_err() { break; }
        if socket.send(Message::Binary(jpeg.into())).await.is_err() { break; }
    }
}
