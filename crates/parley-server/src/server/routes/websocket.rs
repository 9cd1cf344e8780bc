//! Session channel over WebSocket.
//!
//! Each upgraded socket is split in two: a writer task drains the
//! session's outbound queue into the socket, and the read half is handed
//! to the session router as a stream of text frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{future, SinkExt, Stream, StreamExt};
use parley_core::{Outbound, RelayError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::{AppState, SessionRouter};

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// GET /ws
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("WebSocket connection request");
    let router = state.router.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, router))
}

/// Drive one WebSocket connection until either side finishes.
async fn handle_socket(socket: WebSocket, router: SessionRouter) {
    info!("WebSocket connection established");

    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = router.outbound_channel();
    let mut writer = tokio::spawn(write_outbound(sink, outbound_rx));

    let session = router.serve(inbound_frames(stream), outbound_tx);
    tokio::pin!(session);

    tokio::select! {
        _ = &mut session => {
            // Flush whatever the session queued before it closed
            let _ = writer.await;
        }
        _ = &mut writer => {
            debug!("Connection writer finished, ending session");
        }
    }

    info!("WebSocket connection closed");
}

/// Text frames from the client. Close frames and read errors end the stream.
fn inbound_frames(
    stream: SplitStream<WebSocket>,
) -> impl Stream<Item = Result<String, RelayError>> + Unpin + Send {
    stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(_)) => {
                    warn!("Received binary WebSocket message (not supported)");
                    None
                }
                // Pings are answered by the protocol layer
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Close(_)) => None,
                Err(e) => Some(Err(RelayError::transport(e.to_string()))),
            })
        })
}

/// Write outbound items until the queue closes, a close notice is sent,
/// or the socket fails.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let (frame, close) = match &item {
            Outbound::Chat(message) => (message.to_frame(), false),
            Outbound::Notice(notice) => (notice.to_frame(), false),
            Outbound::Close(notice) => (notice.to_frame(), true),
        };

        match frame {
            Ok(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "Failed to send WebSocket message");
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode outbound frame"),
        }

        if close {
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to close WebSocket");
    }
}
