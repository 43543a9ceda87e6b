//! Per-key demultiplexer state.
//!
//! `Demux` is synchronous and owns nothing but plain data and oneshot
//! senders. The listener's dispatcher task is its only owner; tests drive
//! it directly with explicit instants.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use super::event::SpyEvent;
use crate::objects::SpyEnvelope;
use crate::service_key::ServiceKey;

pub(crate) type WaiterId = u64;
pub(crate) type Predicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Final message sent to a waiter. Exactly one is sent per waiter.
#[derive(Debug)]
pub(crate) enum WaitOutcome {
    Resolved(SpyEvent),
    TimedOut,
    Cancelled,
    Disconnected(String),
}

pub(crate) struct Waiter {
    pub id: WaiterId,
    pub key: ServiceKey,
    pub predicate: Option<Predicate>,
    /// Only events with a sequence strictly greater than this match.
    pub after: Option<u64>,
    pub deadline: Instant,
    pub reply: oneshot::Sender<WaitOutcome>,
}

impl Waiter {
    fn accepts(&self, event: &SpyEvent) -> bool {
        self.after.is_none_or(|after| event.sequence > after)
            && self
                .predicate
                .as_ref()
                .is_none_or(|predicate| predicate(&event.payload))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ingested {
    Delivered(WaiterId),
    Buffered { evicted: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registered {
    /// Resolved immediately from the buffer.
    Resolved,
    Pending,
    /// The waiter's handle was already dropped.
    Abandoned,
    /// The deadline passed before the dispatcher saw the waiter.
    Expired,
}

struct Buffered {
    at: Instant,
    event: SpyEvent,
}

#[derive(Default)]
struct KeyState {
    pending: VecDeque<Waiter>,
    buffer: VecDeque<Buffered>,
}

impl KeyState {
    fn prune(&mut self, now: Instant, grace: Duration) {
        while let Some(front) = self.buffer.front() {
            if now.saturating_duration_since(front.at) <= grace {
                break;
            }
            self.buffer.pop_front();
        }
    }

    /// Time out waiters whose deadline is at or before `now`.
    fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for waiter in std::mem::take(&mut self.pending) {
            if waiter.deadline <= now {
                let _ = waiter.reply.send(WaitOutcome::TimedOut);
                expired += 1;
            } else {
                self.pending.push_back(waiter);
            }
        }
        expired
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.buffer.is_empty()
    }
}

/// Hand `event` to `waiter`, or give it back if the waiter is gone.
fn offer(waiter: Waiter, event: SpyEvent) -> Result<WaiterId, SpyEvent> {
    if waiter.reply.is_closed() {
        return Err(event);
    }
    match waiter.reply.send(WaitOutcome::Resolved(event)) {
        Ok(()) => Ok(waiter.id),
        Err(WaitOutcome::Resolved(event)) => Err(event),
        // Only `Resolved` is sent above.
        Err(_) => Ok(waiter.id),
    }
}

pub(crate) struct Demux {
    keys: HashMap<ServiceKey, KeyState>,
    capacity: usize,
    grace: Duration,
    next_sequence: u64,
}

impl Demux {
    pub fn new(capacity: usize, grace: Duration) -> Self {
        Self {
            keys: HashMap::new(),
            capacity,
            grace,
            next_sequence: 0,
        }
    }

    /// Route one inbound envelope to the oldest accepting waiter of its
    /// key, or buffer it.
    pub fn ingest(
        &mut self,
        envelope: SpyEnvelope,
        now: Instant,
        received_at: OffsetDateTime,
    ) -> Ingested {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let mut event = SpyEvent {
            service_key: envelope.service_key.clone(),
            payload: envelope.data,
            received_at,
            sent_at: envelope.timestamp,
            sequence,
        };

        let state = self.keys.entry(envelope.service_key).or_default();
        state.prune(now, self.grace);
        // A waiter past its deadline is timed out even if the timer has
        // not fired yet.
        let expired = state.expire(now);
        if expired > 0 {
            debug!(key = %event.service_key, expired, "Expired waiters before ingest");
        }

        let mut index = 0;
        while index < state.pending.len() {
            if !state.pending[index].accepts(&event) {
                index += 1;
                continue;
            }
            let Some(waiter) = state.pending.remove(index) else {
                break;
            };
            match offer(waiter, event) {
                Ok(id) => return Ingested::Delivered(id),
                Err(returned) => {
                    debug!(key = %returned.service_key, "Skipping abandoned waiter");
                    event = returned;
                }
            }
        }

        state.buffer.push_back(Buffered { at: now, event });
        let mut evicted = 0;
        while state.buffer.len() > self.capacity {
            state.buffer.pop_front();
            evicted += 1;
        }
        Ingested::Buffered { evicted }
    }

    /// Add a waiter, resolving it from the buffer when a buffered event
    /// already matches.
    pub fn register(&mut self, waiter: Waiter, now: Instant) -> Registered {
        let state = self.keys.entry(waiter.key.clone()).or_default();
        state.prune(now, self.grace);
        state.expire(now);

        if waiter.reply.is_closed() {
            return Registered::Abandoned;
        }
        if waiter.deadline <= now {
            let _ = waiter.reply.send(WaitOutcome::TimedOut);
            return Registered::Expired;
        }

        let position = state
            .buffer
            .iter()
            .position(|buffered| waiter.accepts(&buffered.event));
        if let Some(buffered) = position.and_then(|p| state.buffer.remove(p)) {
            let at = buffered.at;
            return match offer(waiter, buffered.event) {
                Ok(_) => Registered::Resolved,
                Err(event) => {
                    if let Some(p) = position {
                        state.buffer.insert(p, Buffered { at, event });
                    }
                    Registered::Abandoned
                }
            };
        }

        state.pending.push_back(waiter);
        Registered::Pending
    }

    /// Cancel one pending waiter. Returns `false` if it already finished.
    pub fn cancel(&mut self, key: &ServiceKey, id: WaiterId) -> bool {
        let Some(state) = self.keys.get_mut(key) else {
            return false;
        };
        let Some(position) = state.pending.iter().position(|w| w.id == id) else {
            return false;
        };
        if let Some(waiter) = state.pending.remove(position) {
            let _ = waiter.reply.send(WaitOutcome::Cancelled);
        }
        true
    }

    /// Time out every waiter whose deadline has passed and drop stale
    /// buffered events.
    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for state in self.keys.values_mut() {
            expired += state.expire(now);
            state.prune(now, self.grace);
        }
        self.keys.retain(|_, state| !state.is_idle());
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.keys
            .values()
            .flat_map(|state| state.pending.iter().map(|w| w.deadline))
            .min()
    }

    /// Finish every pending waiter with `outcome` and drop all buffers.
    pub fn close(&mut self, outcome: impl Fn() -> WaitOutcome) -> usize {
        let mut closed = 0;
        for (_, state) in self.keys.drain() {
            for waiter in state.pending {
                let _ = waiter.reply.send(outcome());
                closed += 1;
            }
        }
        closed
    }

    pub fn pending_len(&self) -> usize {
        self.keys.values().map(|state| state.pending.len()).sum()
    }

    #[cfg(test)]
    pub fn buffered_len(&self, key: &ServiceKey) -> usize {
        self.keys.get(key).map_or(0, |state| state.buffer.len())
    }
}
