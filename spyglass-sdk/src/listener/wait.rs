//! Wait expressions: typed handles on a future event.
//!
//! A [`WaitExpression`] is created by [`SpyListener::wait`](super::SpyListener::wait)
//! already registered with the listener. Awaiting it yields the expression
//! in its resolved state, or a [`WaitError`] describing why it did not
//! resolve.
//!
//! ```ignore
//! let request = listener
//!     .wait::<FunctionRequest<Input>>(key, WaitOptions::new().condition(|e| e.request.key1 == "value1"))
//!     .await?;
//! request.to_match_object(&json!({"request": {"key2": "value2"}}))?;
//!
//! let response = request
//!     .followed_by_response::<FunctionResponse<Output>>(WaitOptions::new())?
//!     .await?;
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::demux::{Predicate, WaitOutcome, Waiter, WaiterId};
use super::event::SpyEvent;
use super::matching::{Mismatch, match_object};
use crate::service_key::{FunctionPhase, ServiceKey};

type Condition<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Options for a single wait.
pub struct WaitOptions<T> {
    condition: Option<Condition<T>>,
    timeout: Option<Duration>,
}

impl<T> WaitOptions<T> {
    pub fn new() -> Self {
        Self {
            condition: None,
            timeout: None,
        }
    }

    /// Only match events whose decoded payload satisfies `condition`.
    ///
    /// Payloads that do not decode into `T` never match.
    pub fn condition(mut self, condition: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Override the listener's default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T> Default for WaitOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a wait expression.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitState<T> {
    Pending,
    Resolved { event: SpyEvent<T>, raw: Value },
    TimedOut,
    Cancelled,
    /// The event channel went away before the wait resolved.
    Disconnected(String),
    /// The matching event could not be decoded into the requested type.
    Failed(String),
}

impl<T: DeserializeOwned> WaitState<T> {
    /// Apply the listener's verdict. Only `Pending` moves; every other
    /// state is final.
    pub(crate) fn apply(self, outcome: WaitOutcome) -> Self {
        match self {
            WaitState::Pending => match outcome {
                WaitOutcome::Resolved(event) => match event.decode::<T>() {
                    Ok(decoded) => WaitState::Resolved {
                        event: decoded,
                        raw: event.payload,
                    },
                    Err(e) => WaitState::Failed(format!("payload could not be decoded: {e}")),
                },
                WaitOutcome::TimedOut => WaitState::TimedOut,
                WaitOutcome::Cancelled => WaitState::Cancelled,
                WaitOutcome::Disconnected(reason) => WaitState::Disconnected(reason),
            },
            finished => finished,
        }
    }
}

impl<T> WaitState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, WaitState::Pending)
    }
}

/// Why a wait expression did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out after {timeout:?} waiting for {key}")]
    Timeout { key: ServiceKey, timeout: Duration },

    #[error("wait for {key} was cancelled")]
    Cancelled { key: ServiceKey },

    #[error("event channel disconnected while waiting for {key}: {reason}")]
    Disconnected { key: ServiceKey, reason: String },

    #[error("wait for {key} failed: {reason}")]
    Failed { key: ServiceKey, reason: String },

    #[error("wait for {key} has not resolved yet")]
    NotResolved { key: ServiceKey },

    #[error("payload of {key} does not match: {mismatch}")]
    Mismatch { key: ServiceKey, mismatch: Mismatch },

    #[error("{key} is not a function stream")]
    NotAFunction { key: ServiceKey },
}

pub(crate) enum Command {
    Register(Waiter),
    Cancel { key: ServiceKey, id: WaiterId },
}

/// Cloneable registration handle onto a listener's dispatcher.
#[derive(Clone)]
pub(crate) struct ListenerHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    default_timeout: Duration,
}

impl ListenerHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, default_timeout: Duration) -> Self {
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            default_timeout,
        }
    }

    pub(crate) fn register<T>(
        &self,
        key: ServiceKey,
        options: WaitOptions<T>,
        after: Option<u64>,
    ) -> WaitExpression<T>
    where
        T: DeserializeOwned + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let predicate = options.condition.map(|condition| -> Predicate {
            Box::new(move |payload: &Value| {
                T::deserialize(payload).is_ok_and(|decoded| condition(&decoded))
            })
        });

        let (reply, receiver) = oneshot::channel();
        let waiter = Waiter {
            id,
            key: key.clone(),
            predicate,
            after,
            deadline: Instant::now() + timeout,
            reply,
        };

        let (state, receiver) = match self.commands.send(Command::Register(waiter)) {
            Ok(()) => (WaitState::Pending, Some(receiver)),
            Err(_) => (WaitState::Cancelled, None),
        };

        WaitExpression {
            key,
            id,
            timeout,
            state,
            receiver,
            handle: self.clone(),
        }
    }
}

/// A pending or finished wait for one event on one service key.
pub struct WaitExpression<T> {
    key: ServiceKey,
    id: WaiterId,
    timeout: Duration,
    state: WaitState<T>,
    receiver: Option<oneshot::Receiver<WaitOutcome>>,
    handle: ListenerHandle,
}

impl<T> WaitExpression<T> {
    pub fn service_key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn state(&self) -> &WaitState<T> {
        &self.state
    }

    /// Withdraw a pending wait. No effect once finished.
    pub fn cancel(&mut self) {
        if self.receiver.take().is_some() {
            let _ = self.handle.commands.send(Command::Cancel {
                key: self.key.clone(),
                id: self.id,
            });
            self.state = WaitState::Cancelled;
        }
    }

    /// `Ok(())` when resolved, otherwise the reason it is not.
    pub fn outcome(&self) -> Result<(), WaitError> {
        match &self.state {
            WaitState::Resolved { .. } => Ok(()),
            WaitState::Pending => Err(WaitError::NotResolved {
                key: self.key.clone(),
            }),
            WaitState::TimedOut => Err(WaitError::Timeout {
                key: self.key.clone(),
                timeout: self.timeout,
            }),
            WaitState::Cancelled => Err(WaitError::Cancelled {
                key: self.key.clone(),
            }),
            WaitState::Disconnected(reason) => Err(WaitError::Disconnected {
                key: self.key.clone(),
                reason: reason.clone(),
            }),
            WaitState::Failed(reason) => Err(WaitError::Failed {
                key: self.key.clone(),
                reason: reason.clone(),
            }),
        }
    }

    /// The resolved event with its metadata.
    pub fn event(&self) -> Result<&SpyEvent<T>, WaitError> {
        match &self.state {
            WaitState::Resolved { event, .. } => Ok(event),
            _ => Err(self.not_resolved()),
        }
    }

    /// The resolved payload. Fails if the wait has not resolved.
    pub fn get_data(&self) -> Result<&T, WaitError> {
        self.event().map(|event| &event.payload)
    }

    pub fn into_data(mut self) -> Result<T, WaitError> {
        match std::mem::replace(&mut self.state, WaitState::Cancelled) {
            WaitState::Resolved { event, .. } => Ok(event.payload),
            other => {
                self.state = other;
                Err(self.not_resolved())
            }
        }
    }

    /// Assert that the resolved payload contains `expected`.
    pub fn to_match_object(&self, expected: &Value) -> Result<&Self, WaitError> {
        let WaitState::Resolved { raw, .. } = &self.state else {
            return Err(self.not_resolved());
        };
        match_object(raw, expected).map_err(|mismatch| WaitError::Mismatch {
            key: self.key.clone(),
            mismatch,
        })?;
        Ok(self)
    }

    /// Wait for an event on `key` that arrived after this one.
    pub fn followed_by<U>(
        &self,
        key: ServiceKey,
        options: WaitOptions<U>,
    ) -> Result<WaitExpression<U>, WaitError>
    where
        U: DeserializeOwned + 'static,
    {
        let sequence = self.event()?.sequence;
        Ok(self.handle.register(key, options, Some(sequence)))
    }

    pub fn followed_by_console<U>(
        &self,
        options: WaitOptions<U>,
    ) -> Result<WaitExpression<U>, WaitError>
    where
        U: DeserializeOwned + 'static,
    {
        self.followed_by_phase(FunctionPhase::Console, options)
    }

    pub fn followed_by_response<U>(
        &self,
        options: WaitOptions<U>,
    ) -> Result<WaitExpression<U>, WaitError>
    where
        U: DeserializeOwned + 'static,
    {
        self.followed_by_phase(FunctionPhase::Response, options)
    }

    pub fn followed_by_error<U>(
        &self,
        options: WaitOptions<U>,
    ) -> Result<WaitExpression<U>, WaitError>
    where
        U: DeserializeOwned + 'static,
    {
        self.followed_by_phase(FunctionPhase::Error, options)
    }

    fn followed_by_phase<U>(
        &self,
        phase: FunctionPhase,
        options: WaitOptions<U>,
    ) -> Result<WaitExpression<U>, WaitError>
    where
        U: DeserializeOwned + 'static,
    {
        let key = self
            .key
            .sibling_phase(phase)
            .ok_or_else(|| WaitError::NotAFunction {
                key: self.key.clone(),
            })?;
        self.followed_by(key, options)
    }

    fn not_resolved(&self) -> WaitError {
        match self.outcome() {
            Err(e) => e,
            Ok(()) => WaitError::NotResolved {
                key: self.key.clone(),
            },
        }
    }
}

impl<T: DeserializeOwned> WaitExpression<T> {
    /// Suspend until the listener resolves, times out, or cancels this
    /// wait.
    ///
    /// Cancel-safe: dropping the future leaves the wait registered.
    pub async fn resolve(&mut self) -> Result<&mut Self, WaitError> {
        if let Some(receiver) = self.receiver.as_mut() {
            let outcome = receiver.await.unwrap_or(WaitOutcome::Cancelled);
            self.receiver = None;
            let state = std::mem::replace(&mut self.state, WaitState::Pending);
            self.state = state.apply(outcome);
        }
        self.outcome()?;
        Ok(self)
    }
}

impl<T> IntoFuture for WaitExpression<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = Result<WaitExpression<T>, WaitError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move {
            self.resolve().await?;
            Ok::<_, WaitError>(self)
        })
    }
}

impl<T> Drop for WaitExpression<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> fmt::Debug for WaitExpression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            WaitState::Pending => "pending",
            WaitState::Resolved { .. } => "resolved",
            WaitState::TimedOut => "timed_out",
            WaitState::Cancelled => "cancelled",
            WaitState::Disconnected(_) => "disconnected",
            WaitState::Failed(_) => "failed",
        };
        f.debug_struct("WaitExpression")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("state", &state)
            .finish()
    }
}
