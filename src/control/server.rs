//! Websocket endpoint for control clients.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::control::ControlPanel;

pub fn router(panel: Arc<ControlPanel>) -> Router {
    Router::new().route("/", get(websocket_handler)).with_state(panel)
}

/// Serve until `shutdown` fires.
pub async fn serve(listener: TcpListener, panel: Arc<ControlPanel>, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("control channel listening on ws://{addr}");
    }
    axum::serve(listener, router(panel))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn websocket_handler(ws: WebSocketUpgrade, State(panel): State<Arc<ControlPanel>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, panel))
}

async fn handle_socket(socket: WebSocket, panel: Arc<ControlPanel>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let id = Uuid::new_v4();
    let mut outgoing = panel.hub().register(id).await;

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outgoing.recv().await {
            if ws_sender.send(Message::Text(envelope.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    panel.on_connect(id).await;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => panel.handle_text(id, text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => panel.handle_text(id, text).await,
                Err(e) => debug!("connection {id}: non UTF-8 frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                error!("WebSocket error on {id}: {e}");
                break;
            }
            Ok(_) => {}
        }
    }

    panel.hub().unregister(id).await;
    writer.abort();
}
