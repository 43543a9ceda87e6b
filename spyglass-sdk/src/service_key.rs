//! Service keys: the stable names of observable event streams.
//!
//! A service key has the form `<Kind>#<segment>[#<segment>...]`, for
//! example `Function#Orders/Create#Request` or `Table#Orders`. The kind
//! prefix determines the shape of the payload carried by the stream.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource kinds that produce observable event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    Function,
    Queue,
    Topic,
    TopicSubscription,
    ObjectStore,
    Table,
    EventBus,
    EventRule,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 8] = [
        ServiceKind::Function,
        ServiceKind::Queue,
        ServiceKind::Topic,
        ServiceKind::TopicSubscription,
        ServiceKind::ObjectStore,
        ServiceKind::Table,
        ServiceKind::EventBus,
        ServiceKind::EventRule,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Function => "Function",
            ServiceKind::Queue => "Queue",
            ServiceKind::Topic => "Topic",
            ServiceKind::TopicSubscription => "TopicSubscription",
            ServiceKind::ObjectStore => "ObjectStore",
            ServiceKind::Table => "Table",
            ServiceKind::EventBus => "EventBus",
            ServiceKind::EventRule => "EventRule",
        }
    }

    /// Whether events of this kind arrive in the event-bus envelope shape.
    pub const fn is_event_bus(self) -> bool {
        matches!(self, ServiceKind::EventBus | ServiceKind::EventRule)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ServiceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ServiceKeyError::UnknownKind(s.to_owned()))
    }
}

/// The four streams every instrumented function produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionPhase {
    Request,
    Error,
    Console,
    Response,
}

impl FunctionPhase {
    /// Registration order used by the instrumenter.
    pub const ALL: [FunctionPhase; 4] = [
        FunctionPhase::Request,
        FunctionPhase::Error,
        FunctionPhase::Console,
        FunctionPhase::Response,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            FunctionPhase::Request => "Request",
            FunctionPhase::Error => "Error",
            FunctionPhase::Console => "Console",
            FunctionPhase::Response => "Response",
        }
    }
}

/// Errors produced when parsing a service key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceKeyError {
    #[error("unknown service kind: {0:?}")]
    UnknownKind(String),

    #[error("service key {0:?} has no segments")]
    MissingSegment(String),

    #[error("service key {0:?} has an empty segment")]
    EmptySegment(String),
}

/// Unique identifier of one observable event stream.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceKey(CompactString);

impl ServiceKey {
    pub const SEPARATOR: char = '#';

    /// Build a key from a kind and its segments.
    pub fn new<I, S>(kind: ServiceKind, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = CompactString::from(kind.as_str());
        for segment in segments {
            raw.push(Self::SEPARATOR);
            raw.push_str(segment.as_ref());
        }
        Self(raw)
    }

    /// `Function#<name>#<Phase>`.
    pub fn function(name: &str, phase: FunctionPhase) -> Self {
        Self::new(ServiceKind::Function, [name, phase.as_str()])
    }

    /// Parse and validate a key received from outside the process.
    pub fn parse(raw: &str) -> Result<Self, ServiceKeyError> {
        let mut parts = raw.split(Self::SEPARATOR);
        let kind = parts.next().unwrap_or_default();
        kind.parse::<ServiceKind>()?;

        let mut segments = 0usize;
        for part in parts {
            if part.is_empty() {
                return Err(ServiceKeyError::EmptySegment(raw.to_owned()));
            }
            segments += 1;
        }
        if segments == 0 {
            return Err(ServiceKeyError::MissingSegment(raw.to_owned()));
        }
        Ok(Self(CompactString::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind prefix, if it names a known kind.
    pub fn kind(&self) -> Option<ServiceKind> {
        self.0
            .split(Self::SEPARATOR)
            .next()
            .and_then(|kind| kind.parse().ok())
    }

    /// Segments after the kind prefix.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR).skip(1)
    }

    /// Splits a function key into its function name and phase.
    pub fn function_phase(&self) -> Option<(&str, FunctionPhase)> {
        if self.kind() != Some(ServiceKind::Function) {
            return None;
        }
        let rest = self.0.strip_prefix("Function#")?;
        let (name, phase) = rest.rsplit_once(Self::SEPARATOR)?;
        let phase = FunctionPhase::ALL
            .into_iter()
            .find(|p| p.as_str() == phase)?;
        Some((name, phase))
    }

    /// The key of another phase of the same function.
    ///
    /// Returns `None` if this is not a function key.
    pub fn sibling_phase(&self, phase: FunctionPhase) -> Option<ServiceKey> {
        self.function_phase()
            .map(|(name, _)| ServiceKey::function(name, phase))
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self.0)
    }
}

impl FromStr for ServiceKey {
    type Err = ServiceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ServiceKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
