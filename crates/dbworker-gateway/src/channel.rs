//! Request/response channel abstraction.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Fault, Request, Response};

/// Channel error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Fault reported by the engine, passed through verbatim.
    #[error(transparent)]
    Engine(#[from] Fault),
    /// The worker is gone. Never re-established.
    #[error("Worker channel disconnected")]
    Disconnected,
    /// The reply did not match the request kind.
    #[error("Unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

impl ChannelError {
    /// The engine fault, if this error carries one.
    #[must_use]
    pub const fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Engine(fault) => Some(fault),
            _ => None,
        }
    }
}

/// A channel that dispatches one request and returns its correlated response.
///
/// Implementations must allow many requests to be outstanding at once.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Dispatch a request.
    async fn dispatch(&self, request: Request) -> Result<Response, ChannelError>;
}
