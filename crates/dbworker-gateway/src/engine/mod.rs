//! Engines hosted by a worker.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryEngine;

use async_trait::async_trait;

use crate::protocol::{Fault, Request, Response};

/// Trait for database engines.
///
/// The worker owns its engine exclusively and hands it one request at a time.
#[async_trait]
pub trait Engine: Send + 'static {
    /// Prepare the engine. The worker reports ready only after this succeeds.
    async fn init(&mut self) -> Result<(), Fault> {
        Ok(())
    }

    /// Handle a single request.
    async fn handle(&mut self, request: Request) -> Result<Response, Fault>;
}
