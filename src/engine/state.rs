//! Request state machine.

use std::fmt;

use tracing::debug;

use crate::error::IntrospectError;

/// Steps of one introspection request.
///
/// ```text
/// Received → CacheLookup → CacheHit → Done
///                        └ CacheMiss → ResolveAdapter → AcquireConnection
///                                    → Invoke → Normalize → CacheStore → Done
/// any step → Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    Received,
    CacheLookup,
    CacheHit,
    CacheMiss,
    ResolveAdapter,
    AcquireConnection,
    Invoke,
    Normalize,
    CacheStore,
    Done,
    Failed(String),
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed(_))
    }

    pub fn failed(err: &IntrospectError) -> Self {
        RequestState::Failed(err.to_string())
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Received => f.write_str("received"),
            RequestState::CacheLookup => f.write_str("cache_lookup"),
            RequestState::CacheHit => f.write_str("cache_hit"),
            RequestState::CacheMiss => f.write_str("cache_miss"),
            RequestState::ResolveAdapter => f.write_str("resolve_adapter"),
            RequestState::AcquireConnection => f.write_str("acquire_connection"),
            RequestState::Invoke => f.write_str("invoke"),
            RequestState::Normalize => f.write_str("normalize"),
            RequestState::CacheStore => f.write_str("cache_store"),
            RequestState::Done => f.write_str("done"),
            RequestState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Current state of one request, logging each transition.
#[derive(Debug)]
pub(crate) struct Tracker {
    state: RequestState,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        debug!(state = %RequestState::Received, "request state");
        Self {
            state: RequestState::Received,
        }
    }

    /// Continue a request in another task from a known step.
    pub(crate) fn resume(state: RequestState) -> Self {
        Self { state }
    }

    pub(crate) fn to(&mut self, next: RequestState) {
        debug!(from = %self.state, to = %next, "request state");
        self.state = next;
    }

    /// Record a failure and hand the error back.
    pub(crate) fn fail(&mut self, err: IntrospectError) -> IntrospectError {
        self.to(RequestState::failed(&err));
        err
    }

    #[cfg(test)]
    fn state(&self) -> &RequestState {
        &self.state
    }
}
