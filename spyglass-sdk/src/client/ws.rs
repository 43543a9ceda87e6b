//! Live channel client (listener ← relay).

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::ClientError;
use crate::listener::{FrameSender, ListenerConfig, SpyListener};

/// Open the relay's live channel at `url` (e.g. `ws://localhost:8080/ws`)
/// and start a listener fed by it.
///
/// The socket is closed by [`SpyListener::stop`]. If the relay drops the
/// connection, every pending wait fails and later waits fail immediately.
pub async fn connect(url: &Url, config: &ListenerConfig) -> Result<SpyListener, ClientError> {
    let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
    info!(%url, "Connected to live channel");

    let (frames, listener) = SpyListener::channel(config);
    let mut shutdown_rx = listener.shutdown_signal();
    let (mut write, mut read) = stream.split();

    let reader = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        if let Err(e) = write.close().await {
                            debug!(error = %e, "Live channel close handshake failed");
                        }
                        break;
                    }
                }

                message = read.next() => {
                    if !forward_message(&frames, message).await {
                        break;
                    }
                }
            }
        }
        debug!("Live channel reader stopped");
    });
    listener.track(reader);

    Ok(listener)
}

/// Returns `false` once the socket is finished.
async fn forward_message(
    frames: &FrameSender,
    message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> bool {
    let reason = match message {
        Some(Ok(Message::Text(text))) => return frames.send_text(text).await.is_ok(),
        Some(Ok(Message::Close(frame))) => frame
            .map(|f| f.reason.to_string())
            .unwrap_or_else(|| "closed by relay".to_owned()),
        Some(Ok(_)) => return true,
        Some(Err(e)) => {
            warn!(error = %e, "Live channel read failed");
            e.to_string()
        }
        None => "stream ended".to_owned(),
    };
    if frames.disconnect(reason).await.is_err() {
        debug!("Listener already stopped");
    }
    false
}
