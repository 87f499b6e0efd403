//! Gateway to a database engine hosted on a background worker.
//!
//! Provides:
//! - Wire protocol (`Request` / `Response` over the five operation kinds)
//! - `WorkerChannel` - message-id correlated channel to a worker task
//! - `Gateway` - request API usable before the channel is ready
//! - `MemoryEngine` - reference engine (feature: memory)

pub mod channel;
pub mod engine;
pub mod gateway;
pub mod protocol;
pub mod worker;

pub use channel::{Channel, ChannelError};
pub use engine::Engine;
#[cfg(feature = "memory")]
pub use engine::MemoryEngine;
pub use gateway::Gateway;
pub use protocol::{ExecArgs, ExecOptions, Fault, Request, Response};
pub use worker::{WorkerChannel, WorkerConfig};
