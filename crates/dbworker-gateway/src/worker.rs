//! Worker task hosting an engine, and the channel that talks to it.
//!
//! The worker posts a ready notice once its engine has started, then answers
//! each request with a reply tagged by the request's message id. A router task
//! on the gateway side hands every reply to the caller waiting on that id.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    channel::{Channel, ChannelError},
    engine::Engine,
    protocol::{Fault, Request, Response},
};

/// Default inbound queue bound.
const QUEUE_CAPACITY: usize = 64;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name used in log output.
    pub name: String,
    /// Requests that may be queued before `dispatch` waits for room.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "dbworker".into(),
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

impl WorkerConfig {
    /// Config with a custom worker name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the inbound queue bound.
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

type Outcome = Result<Response, Fault>;
type Waiters = HashMap<Uuid, oneshot::Sender<Outcome>>;

/// Callers waiting for a reply, keyed by message id.
///
/// Closed for good once the router stops; registering after that fails.
struct Pending {
    waiters: Mutex<Option<Waiters>>,
}

impl Pending {
    fn new() -> Self {
        Self {
            waiters: Mutex::new(Some(HashMap::new())),
        }
    }

    fn register(&self, message_id: Uuid) -> Option<oneshot::Receiver<Outcome>> {
        let mut waiters = self.lock();
        let waiters = waiters.as_mut()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        waiters.insert(message_id, reply_tx);
        Some(reply_rx)
    }

    fn take(&self, message_id: &Uuid) -> Option<oneshot::Sender<Outcome>> {
        self.lock().as_mut()?.remove(message_id)
    }

    /// Drop every waiter and refuse new ones. Returns how many were dropped.
    fn close(&self) -> usize {
        self.lock().take().as_ref().map_or(0, HashMap::len)
    }

    fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, HashMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Waiters>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inbound {
    message_id: Uuid,
    request: Request,
}

enum Outbound {
    Ready,
    StartupFailed(Fault),
    Reply { message_id: Uuid, outcome: Outcome },
}

/// Channel to an engine running on its own task.
pub struct WorkerChannel {
    name: String,
    inbox: mpsc::Sender<Inbound>,
    pending: Arc<Pending>,
}

impl WorkerChannel {
    /// Start a worker for `engine` and wait until it reports ready.
    ///
    /// The worker stops once every handle to the channel is dropped.
    ///
    /// # Errors
    /// Returns the engine's startup fault, or `Disconnected` if the worker
    /// died before becoming ready.
    pub async fn spawn<E: Engine>(engine: E, config: WorkerConfig) -> Result<Self, ChannelError> {
        let WorkerConfig {
            name,
            queue_capacity,
        } = config;
        let (inbox, inbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(name.clone(), engine, inbound_rx, outbound_tx));

        match outbound_rx.recv().await {
            Some(Outbound::Ready) => debug!(worker = %name, "Worker ready"),
            Some(Outbound::StartupFailed(fault)) => return Err(fault.into()),
            Some(Outbound::Reply { message_id, .. }) => {
                warn!(worker = %name, %message_id, "Reply before ready notice");
                return Err(ChannelError::Disconnected);
            }
            None => return Err(ChannelError::Disconnected),
        }

        let pending = Arc::new(Pending::new());
        tokio::spawn(route_replies(name.clone(), outbound_rx, Arc::clone(&pending)));

        Ok(Self {
            name,
            inbox,
            pending,
        })
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Channel for WorkerChannel {
    async fn dispatch(&self, request: Request) -> Result<Response, ChannelError> {
        let message_id = Uuid::new_v4();
        let Some(reply_rx) = self.pending.register(message_id) else {
            return Err(ChannelError::Disconnected);
        };

        debug!(worker = %self.name, %message_id, operation = request.kind(), "Dispatching request");
        if self
            .inbox
            .send(Inbound {
                message_id,
                request,
            })
            .await
            .is_err()
        {
            self.pending.take(&message_id);
            return Err(ChannelError::Disconnected);
        }

        match reply_rx.await {
            Ok(outcome) => outcome.map_err(ChannelError::from),
            Err(_) => Err(ChannelError::Disconnected),
        }
    }
}

async fn run_worker<E: Engine>(
    name: String,
    mut engine: E,
    mut inbox: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
) {
    if let Err(fault) = engine.init().await {
        error!(worker = %name, "Engine failed to start: {fault}");
        let _ = outbound.send(Outbound::StartupFailed(fault));
        return;
    }
    if outbound.send(Outbound::Ready).is_err() {
        return;
    }

    while let Some(Inbound {
        message_id,
        request,
    }) = inbox.recv().await
    {
        let outcome = engine.handle(request).await;
        if let Err(fault) = &outcome {
            debug!(worker = %name, %message_id, "Engine fault: {fault}");
        }
        if outbound.send(Outbound::Reply { message_id, outcome }).is_err() {
            break;
        }
    }
    debug!(worker = %name, "Worker stopped");
}

async fn route_replies(
    name: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    pending: Arc<Pending>,
) {
    while let Some(event) = outbound.recv().await {
        match event {
            Outbound::Reply {
                message_id,
                outcome,
            } => {
                match pending.take(&message_id) {
                    Some(reply_tx) => {
                        let _ = reply_tx.send(outcome);
                    }
                    None => warn!(worker = %name, %message_id, "Unhandled worker message"),
                }
            }
            Outbound::Ready | Outbound::StartupFailed(_) => {
                warn!(worker = %name, "Unhandled worker message");
            }
        }
    }

    // Dropping the senders fails every waiter with `Disconnected`.
    let orphaned = pending.close();
    if orphaned > 0 {
        error!(worker = %name, orphaned, "Worker terminated with requests in flight");
    } else {
        debug!(worker = %name, "Worker channel closed");
    }
}
