//! Live event listener.
//!
//! A [`SpyListener`] owns one inbound channel of JSON frames (see
//! [`SpyEnvelope`]) and one dispatcher task. The dispatcher is the only
//! owner of the demultiplexer: waits are registered and withdrawn through
//! a command channel, and every wait deadline is tracked by the dispatcher
//! itself, so an event and a timeout can never both finish the same wait.
//!
//! # Frame flow
//!
//! 1. A frame arrives and is decoded into a [`SpyEnvelope`]. Malformed
//!    frames are logged and dropped.
//! 2. The oldest pending wait on the frame's service key whose condition
//!    accepts it receives the event.
//! 3. Otherwise the event is buffered (newest `buffer_capacity` per key,
//!    for at most `grace_window`) so a wait registered shortly afterwards
//!    still sees it.

mod demux;
mod event;
mod matching;
mod wait;

pub use event::SpyEvent;
pub use matching::{Mismatch, match_object};
pub use wait::{WaitError, WaitExpression, WaitOptions, WaitState};

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::objects::SpyEnvelope;
use crate::service_key::ServiceKey;
use demux::{Demux, Ingested, WaitOutcome};
use wait::{Command, ListenerHandle};

/// Default number of inbound frames queued ahead of the dispatcher.
pub const DEFAULT_FRAME_BUFFER: usize = 256;

/// Listener tuning.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Events retained per service key while nobody waits for them.
    pub buffer_capacity: usize,
    /// How long an unclaimed event stays visible to new waits.
    pub grace_window: Duration,
    /// Timeout applied to waits that do not set their own.
    pub default_timeout: Duration,
    /// Inbound frame queue length.
    pub frame_buffer: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            grace_window: Duration::from_secs(30),
            default_timeout: Duration::from_secs(10),
            frame_buffer: DEFAULT_FRAME_BUFFER,
        }
    }
}

impl ListenerConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_grace_window(mut self, grace_window: Duration) -> Self {
        self.grace_window = grace_window;
        self
    }
}

/// Errors produced when feeding a listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener is stopped")]
    Stopped,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

pub(crate) enum Inbound {
    Frame(String),
    Closed(String),
}

/// Producer side of a listener's inbound channel.
///
/// The websocket client holds one; tests can hold one directly to play
/// the role of the relay.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Inbound>,
}

impl FrameSender {
    /// Deliver one raw text frame.
    pub async fn send_text(&self, frame: impl Into<String>) -> Result<(), ListenerError> {
        self.tx
            .send(Inbound::Frame(frame.into()))
            .await
            .map_err(|_| ListenerError::Stopped)
    }

    /// Encode and deliver one envelope.
    pub async fn send(&self, envelope: &SpyEnvelope) -> Result<(), ListenerError> {
        let frame = serde_json::to_string(envelope)?;
        self.send_text(frame).await
    }

    /// Report that the underlying channel is gone. Every pending wait
    /// fails and later waits fail immediately.
    pub async fn disconnect(&self, reason: impl Into<String>) -> Result<(), ListenerError> {
        self.tx
            .send(Inbound::Closed(reason.into()))
            .await
            .map_err(|_| ListenerError::Stopped)
    }
}

/// One listener session.
pub struct SpyListener {
    handle: ListenerHandle,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SpyListener {
    /// Start a listener fed through the returned [`FrameSender`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn channel(config: &ListenerConfig) -> (FrameSender, SpyListener) {
        let (frame_tx, frame_rx) = mpsc::channel(config.frame_buffer.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let demux = Demux::new(config.buffer_capacity, config.grace_window);
        let dispatcher = tokio::spawn(run_dispatcher(demux, frame_rx, command_rx, shutdown_rx));

        let listener = SpyListener {
            handle: ListenerHandle::new(command_tx, config.default_timeout),
            shutdown_tx,
            tasks: Mutex::new(vec![dispatcher]),
        };
        (FrameSender { tx: frame_tx }, listener)
    }

    /// Register a wait for the next event on `key` accepted by `options`.
    pub fn wait<T>(&self, key: ServiceKey, options: WaitOptions<T>) -> WaitExpression<T>
    where
        T: DeserializeOwned + 'static,
    {
        self.handle.register(key, options, None)
    }

    /// Close the channel and cancel every pending wait. Idempotent.
    pub async fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Stopping spy listener");
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Spy listener task ended abnormally");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    #[cfg_attr(not(feature = "client"), allow(dead_code))]
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Tie a background task's lifetime to this listener's `stop()`.
    #[cfg_attr(not(feature = "client"), allow(dead_code))]
    pub(crate) fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

impl Drop for SpyListener {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

const DISCONNECTED: &str = "event channel disconnected";

/// Dispatcher loop: the single owner of all waits and buffers.
async fn run_dispatcher(
    mut demux: Demux,
    mut frames: mpsc::Receiver<Inbound>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Spy listener dispatcher started");
    let mut connected = true;

    loop {
        let deadline = demux.next_deadline();
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            biased;

            // Shutdown has highest priority.
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            // Register before ingesting so a wait issued ahead of a frame
            // is pending when that frame is routed.
            command = commands.recv() => match command {
                Some(Command::Register(waiter)) => {
                    if !connected {
                        let _ = waiter.reply.send(WaitOutcome::Disconnected(DISCONNECTED.into()));
                        continue;
                    }
                    let key = waiter.key.clone();
                    let registered = demux.register(waiter, Instant::now());
                    debug!(%key, ?registered, "Registered wait");
                }
                Some(Command::Cancel { key, id }) => {
                    if demux.cancel(&key, id) {
                        debug!(%key, id, "Cancelled wait");
                    }
                }
                None => break,
            },

            inbound = frames.recv(), if connected => match inbound {
                Some(Inbound::Frame(text)) => route_frame(&mut demux, &text),
                Some(Inbound::Closed(reason)) => {
                    connected = false;
                    let failed = demux.close(|| WaitOutcome::Disconnected(format!("{DISCONNECTED}: {reason}")));
                    warn!(%reason, failed, "Event channel disconnected");
                }
                None => {
                    connected = false;
                    let failed = demux.close(|| WaitOutcome::Disconnected(DISCONNECTED.into()));
                    warn!(failed, "Event channel closed");
                }
            },

            _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                let expired = demux.expire(Instant::now());
                if expired > 0 {
                    debug!(expired, "Wait deadlines elapsed");
                }
            }
        }
    }

    let cancelled = demux.close(|| WaitOutcome::Cancelled);
    info!(cancelled, "Spy listener stopped");
}

fn route_frame(demux: &mut Demux, text: &str) {
    let envelope: SpyEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Dropping malformed frame");
            return;
        }
    };
    if envelope.service_key.kind().is_none() {
        warn!(key = %envelope.service_key, "Dropping frame with unknown service kind");
        return;
    }

    let key = envelope.service_key.clone();
    match demux.ingest(envelope, Instant::now(), OffsetDateTime::now_utc()) {
        Ingested::Delivered(id) => debug!(%key, waiter = id, "Delivered event"),
        Ingested::Buffered { evicted } => debug!(%key, evicted, "Buffered event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{FunctionRequest, FunctionResponse, TableChange};
    use crate::service_key::{FunctionPhase, ServiceKind};
    use serde::Deserialize;
    use serde_json::{Value, json};

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct DataType {
        key1: String,
        key2: String,
    }

    fn function_key(phase: FunctionPhase) -> ServiceKey {
        ServiceKey::function("F", phase)
    }

    fn table_key() -> ServiceKey {
        ServiceKey::new(ServiceKind::Table, ["T"])
    }

    fn data() -> Value {
        json!({"key1": "value1", "key2": "value2"})
    }

    #[tokio::test]
    async fn test_two_waits_resolve_in_arrival_order() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let first = listener.wait::<Value>(table_key(), WaitOptions::new());
        let second = listener.wait::<Value>(table_key(), WaitOptions::new());

        frames.send(&SpyEnvelope::new(table_key(), json!("A"))).await.unwrap();
        frames.send(&SpyEnvelope::new(table_key(), json!("B"))).await.unwrap();

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.get_data().unwrap(), &json!("A"));
        assert_eq!(second.get_data().unwrap(), &json!("B"));
        assert!(first.event().unwrap().sequence < second.event().unwrap().sequence);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_function_and_table_scenario() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());

        let request = listener.wait::<FunctionRequest<DataType>>(
            function_key(FunctionPhase::Request),
            WaitOptions::new().condition(|e: &FunctionRequest<DataType>| e.request.key1 == "value1"),
        );

        frames
            .send(&SpyEnvelope::new(
                function_key(FunctionPhase::Request),
                json!({"request": {"key1": "other", "key2": "x"}}),
            ))
            .await
            .unwrap();
        frames
            .send(&SpyEnvelope::new(
                function_key(FunctionPhase::Request),
                json!({"request": data()}),
            ))
            .await
            .unwrap();

        let request = request.await.unwrap();
        request
            .to_match_object(&json!({"request": {"key1": "value1"}}))
            .unwrap()
            .to_match_object(&json!({"request": {"key2": "value2"}}))
            .unwrap();
        assert_eq!(request.get_data().unwrap().request.key2, "value2");

        frames
            .send(&SpyEnvelope::new(
                table_key(),
                json!({"newImage": data(), "oldImage": null}),
            ))
            .await
            .unwrap();

        let change = listener
            .wait::<TableChange<DataType>>(
                table_key(),
                WaitOptions::new().condition(|c: &TableChange<DataType>| {
                    c.new_image.as_ref().is_some_and(|item| item.key1 == "value1")
                }),
            )
            .await
            .unwrap();
        assert!(change.get_data().unwrap().old_image.is_none());

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_followed_by_ignores_earlier_events() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let request = listener.wait::<Value>(function_key(FunctionPhase::Request), WaitOptions::new());

        // A response from an earlier invocation lands before the request.
        frames
            .send(&SpyEnvelope::new(
                function_key(FunctionPhase::Response),
                json!({"request": {}, "response": "stale"}),
            ))
            .await
            .unwrap();
        frames
            .send(&SpyEnvelope::new(function_key(FunctionPhase::Request), json!({"request": {}})))
            .await
            .unwrap();

        let request = request.await.unwrap();
        let response = request
            .followed_by_response::<FunctionResponse<String>>(WaitOptions::new())
            .unwrap();

        frames
            .send(&SpyEnvelope::new(
                function_key(FunctionPhase::Response),
                json!({"request": {}, "response": "fresh"}),
            ))
            .await
            .unwrap();

        let response = response.await.unwrap();
        assert_eq!(response.get_data().unwrap().response, "fresh");
        assert!(response.event().unwrap().sequence > request.event().unwrap().sequence);

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_followed_by_phase_requires_function_key() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        frames.send(&SpyEnvelope::new(table_key(), json!({}))).await.unwrap();
        let change = listener.wait::<Value>(table_key(), WaitOptions::new()).await.unwrap();
        assert!(matches!(
            change.followed_by_console::<Value>(WaitOptions::new()),
            Err(WaitError::NotAFunction { .. })
        ));
        listener.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_and_final() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let mut expression = listener.wait::<Value>(
            table_key(),
            WaitOptions::new().timeout(Duration::from_millis(50)),
        );

        let err = expression.resolve().await.unwrap_err();
        assert!(matches!(err, WaitError::Timeout { timeout, .. } if timeout == Duration::from_millis(50)));
        assert_eq!(expression.state(), &WaitState::TimedOut);

        frames.send(&SpyEnvelope::new(table_key(), json!("late"))).await.unwrap();
        assert!(matches!(
            expression.resolve().await,
            Err(WaitError::Timeout { .. })
        ));

        // The late event was not consumed by the timed-out wait.
        let next = listener.wait::<Value>(table_key(), WaitOptions::new()).await.unwrap();
        assert_eq!(next.get_data().unwrap(), &json!("late"));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_frame_after_deadline_loses_to_timeout() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let expression = listener.wait::<Value>(
            table_key(),
            WaitOptions::new().timeout(Duration::from_millis(50)),
        );
        tokio::task::yield_now().await;

        // Block the runtime past the deadline so the frame is seen first.
        std::thread::sleep(Duration::from_millis(100));
        frames.send(&SpyEnvelope::new(table_key(), json!("late"))).await.unwrap();

        assert!(matches!(expression.await, Err(WaitError::Timeout { .. })));
        let next = listener.wait::<Value>(table_key(), WaitOptions::new()).await.unwrap();
        assert_eq!(next.get_data().unwrap(), &json!("late"));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_mismatch_is_an_assertion_error() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        frames
            .send(&SpyEnvelope::new(table_key(), json!({"newImage": {"key1": "value1"}})))
            .await
            .unwrap();
        let change = listener.wait::<Value>(table_key(), WaitOptions::new()).await.unwrap();
        let err = change
            .to_match_object(&json!({"newImage": {"key1": "nope"}}))
            .unwrap_err();
        match err {
            WaitError::Mismatch { mismatch, .. } => assert_eq!(mismatch.path, "$.newImage.key1"),
            other => panic!("expected mismatch, got {other:?}"),
        }
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        frames.send_text("not json").await.unwrap();
        frames
            .send_text(r#"{"serviceKey":"Bucket#X","data":{}}"#)
            .await
            .unwrap();
        frames.send(&SpyEnvelope::new(table_key(), json!(1))).await.unwrap();

        let ok = listener.wait::<Value>(table_key(), WaitOptions::new()).await.unwrap();
        assert_eq!(ok.get_data().unwrap(), &json!(1));
        assert_eq!(ok.event().unwrap().sequence, 0);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_and_is_idempotent() {
        let (_frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let pending = listener.wait::<Value>(table_key(), WaitOptions::new());

        listener.stop().await;
        listener.stop().await;
        assert!(listener.is_stopped());

        assert!(matches!(pending.await, Err(WaitError::Cancelled { .. })));
        assert!(matches!(
            listener.wait::<Value>(table_key(), WaitOptions::new()).await,
            Err(WaitError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_waits() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let pending = listener.wait::<Value>(table_key(), WaitOptions::new());
        frames.disconnect("socket reset").await.unwrap();

        match pending.await {
            Err(WaitError::Disconnected { reason, .. }) => assert!(reason.contains("socket reset")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(matches!(
            listener.wait::<Value>(table_key(), WaitOptions::new()).await,
            Err(WaitError::Disconnected { .. })
        ));
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_cancelled_wait_does_not_consume() {
        let (frames, listener) = SpyListener::channel(&ListenerConfig::default());
        let mut first = listener.wait::<Value>(table_key(), WaitOptions::new());
        let second = listener.wait::<Value>(table_key(), WaitOptions::new());
        first.cancel();
        assert_eq!(first.state(), &WaitState::Cancelled);

        frames.send(&SpyEnvelope::new(table_key(), json!("only"))).await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(second.get_data().unwrap(), &json!("only"));
        listener.stop().await;
    }
}
