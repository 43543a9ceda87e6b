use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use spyglass_core::events::EnvelopeReceiver;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::state::AppState;

/// `GET /ws` — live channel.
///
/// Every envelope published after the upgrade request arrives is pushed as
/// one JSON text frame. Nothing is replayed.
pub(super) async fn live_channel(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Subscribe before answering the upgrade so nothing published after
    // the client sees the handshake complete is missed.
    let envelopes = state.envelopes.subscribe();
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| handle_session(socket, envelopes, shutdown))
}

/// Drives a single session until the client leaves, the channel closes, or
/// the server shuts down.
async fn handle_session(
    mut socket: WebSocket,
    envelopes: EnvelopeReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Live session opened");
    let mut envelopes = BroadcastStream::new(envelopes);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    tracing::debug!("Server shutting down, closing live session");
                    break;
                }
            }

            next = envelopes.next() => {
                match next {
                    Some(Ok(envelope)) => {
                        if send_json(&mut socket, &envelope).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!(skipped, "Live session lagged, envelopes dropped");
                    }
                    None => break,
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        tracing::debug!("Live session closed by client");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

/// Serialize `value` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let json = serde_json::to_string(value).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}
