//! Request API over a channel that becomes ready asynchronously.

use std::sync::{Arc, OnceLock};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tracing::{debug, error};

use crate::{
    channel::{Channel, ChannelError},
    engine::Engine,
    protocol::{
        CloseArgs, CloseResult, ConfigGetResult, ExecArgs, ExecOptions, ExportResult, NoArgs,
        OpenArgs, OpenResult, Request, Response,
    },
    worker::{WorkerChannel, WorkerConfig},
};

type Ready = Shared<BoxFuture<'static, Result<Arc<dyn Channel>, ChannelError>>>;

static GLOBAL: OnceLock<Gateway> = OnceLock::new();

/// Gateway to a database engine.
///
/// Construction starts connecting in the background. Every operation waits
/// for the same one-shot readiness signal before dispatching, so calls made
/// right after construction behave exactly like calls made later. Calls are
/// not serialized against each other; the channel correlates replies.
///
/// Cloning is cheap and shares the channel. A failed or crashed channel is
/// never re-established. `Gateway::global_with` holds the process-wide
/// instance; scoped callers and tests can construct their own.
#[derive(Clone)]
pub struct Gateway {
    ready: Ready,
}

impl Gateway {
    /// Start establishing a channel with `connect`.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new<F, C>(connect: F) -> Self
    where
        F: Future<Output = Result<C, ChannelError>> + Send + 'static,
        C: Channel + 'static,
    {
        let handle = tokio::spawn(connect);
        let ready = async move {
            match handle.await {
                Ok(Ok(channel)) => {
                    debug!("Gateway channel ready");
                    Ok(Arc::new(channel) as Arc<dyn Channel>)
                }
                Ok(Err(e)) => {
                    error!("Gateway channel failed to start: {e}");
                    Err(e)
                }
                Err(e) => {
                    error!("Gateway connect task failed: {e}");
                    Err(ChannelError::Disconnected)
                }
            }
        }
        .boxed()
        .shared();

        Self { ready }
    }

    /// Process-wide gateway, built by `init` on the first call.
    ///
    /// Later calls return the same instance and never run their `init`. The
    /// connection is driven by the runtime of the first caller.
    pub fn global_with(init: impl FnOnce() -> Self) -> &'static Self {
        GLOBAL.get_or_init(init)
    }

    /// Process-wide gateway, if one has been created.
    #[must_use]
    pub fn global() -> Option<&'static Self> {
        GLOBAL.get()
    }

    /// Host `engine` on a new worker and connect to it.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_worker<E: Engine>(engine: E, config: WorkerConfig) -> Self {
        Self::new(WorkerChannel::spawn(engine, config))
    }

    /// Wait until the channel is ready.
    ///
    /// # Errors
    /// Returns the error that prevented the channel from starting.
    pub async fn ready(&self) -> Result<(), ChannelError> {
        self.channel().await.map(drop)
    }

    /// Whether the channel has become ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.peek().is_some_and(Result::is_ok)
    }

    /// Open a database. `filename` may be a `file:` URI.
    ///
    /// # Errors
    /// Returns the channel's error unchanged.
    pub async fn open(
        &self,
        filename: impl Into<String>,
        vfs: Option<&str>,
    ) -> Result<OpenResult, ChannelError> {
        let request = Request::Open(OpenArgs {
            filename: filename.into(),
            vfs: vfs.map(str::to_owned),
        });
        match self.request(request).await? {
            Response::Open(result) => Ok(result),
            other => Err(unexpected("open", &other)),
        }
    }

    /// Close the open database; `unlink` also deletes it.
    ///
    /// # Errors
    /// Returns the channel's error unchanged.
    pub async fn close(&self, options: Option<CloseArgs>) -> Result<CloseResult, ChannelError> {
        match self
            .request(Request::Close(options.unwrap_or_default()))
            .await?
        {
            Response::Close(result) => Ok(result),
            other => Err(unexpected("close", &other)),
        }
    }

    /// Engine configuration and capabilities.
    ///
    /// # Errors
    /// Returns the channel's error unchanged.
    pub async fn introspect(&self) -> Result<ConfigGetResult, ChannelError> {
        match self.request(Request::ConfigGet(NoArgs {})).await? {
            Response::ConfigGet(result) => Ok(result),
            other => Err(unexpected("config-get", &other)),
        }
    }

    /// Binary snapshot of the open database.
    ///
    /// # Errors
    /// Returns the channel's error unchanged.
    pub async fn export(&self) -> Result<ExportResult, ChannelError> {
        match self.request(Request::Export(NoArgs {})).await? {
            Response::Export(result) => Ok(result),
            other => Err(unexpected("export", &other)),
        }
    }

    /// Execute a raw SQL string or structured options.
    ///
    /// # Errors
    /// Returns the channel's error unchanged, including engine faults for
    /// invalid SQL.
    pub async fn execute(
        &self,
        statement: impl Into<ExecArgs>,
    ) -> Result<ExecOptions, ChannelError> {
        match self.request(Request::Exec(statement.into())).await? {
            Response::Exec(result) => Ok(result),
            other => Err(unexpected("exec", &other)),
        }
    }

    async fn request(&self, request: Request) -> Result<Response, ChannelError> {
        let channel = self.channel().await?;
        channel.dispatch(request).await
    }

    async fn channel(&self) -> Result<Arc<dyn Channel>, ChannelError> {
        self.ready.clone().await
    }
}

fn unexpected(expected: &'static str, got: &Response) -> ChannelError {
    ChannelError::UnexpectedResponse {
        expected,
        got: got.kind(),
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use async_trait::async_trait;
    use futures::future;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, task};

    use super::*;
    use crate::{
        engine::MemoryEngine,
        protocol::{Fault, RowMode},
    };

    /// Holds the engine's startup until the gate is released.
    struct Gated<E> {
        gate: Option<oneshot::Receiver<()>>,
        inner: E,
    }

    #[async_trait]
    impl<E: Engine> Engine for Gated<E> {
        async fn init(&mut self) -> Result<(), Fault> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            self.inner.init().await
        }

        async fn handle(&mut self, request: Request) -> Result<Response, Fault> {
            self.inner.handle(request).await
        }
    }

    fn gated() -> (Gateway, oneshot::Sender<()>) {
        let (release, gate) = oneshot::channel();
        let engine = Gated {
            gate: Some(gate),
            inner: MemoryEngine::new(),
        };
        (Gateway::spawn_worker(engine, WorkerConfig::new("gated")), release)
    }

    /// Replies to everything with a close result.
    struct ConfusedEngine;

    #[async_trait]
    impl Engine for ConfusedEngine {
        async fn handle(&mut self, _request: Request) -> Result<Response, Fault> {
            Ok(Response::Close(CloseResult::default()))
        }
    }

    #[tokio::test]
    async fn test_calls_before_ready_wait_for_readiness() {
        let (gateway, release) = gated();

        let early = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.open("file:test.db", None).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!gateway.is_ready());
        assert!(!early.is_finished());

        release.send(()).unwrap();
        let early = early.await.unwrap().unwrap();
        assert!(gateway.is_ready());

        let patient = Gateway::spawn_worker(MemoryEngine::new(), WorkerConfig::default());
        patient.ready().await.unwrap();
        let later = patient.open("file:test.db", None).await.unwrap();

        assert_eq!(early, later);
    }

    #[tokio::test]
    async fn test_ready_is_pending_until_signal() {
        let (gateway, release) = gated();

        let mut ready = task::spawn(gateway.ready());
        assert_pending!(ready.poll());

        release.send(()).unwrap();
        gateway.ready().await.unwrap();
        assert!(gateway.is_ready());
    }

    #[tokio::test]
    async fn test_operations_round_trip() {
        let gateway = Gateway::spawn_worker(MemoryEngine::new(), WorkerConfig::default());

        let opened = gateway.open("notes.db", Some("opfs")).await.unwrap();
        assert!(opened.persistent);
        assert!(!opened.db_id.is_empty());

        let config = gateway.introspect().await.unwrap();
        assert!(config.vfs_list.iter().any(|vfs| vfs == "opfs"));

        gateway.execute("CREATE TABLE notes(body)").await.unwrap();
        let rows = gateway
            .execute(ExecOptions::new("SELECT body FROM notes").with_rows(RowMode::Array))
            .await
            .unwrap();
        assert_eq!(rows.result_rows, Some(Vec::new()));

        let snapshot = gateway.export().await.unwrap();
        assert_eq!(snapshot.filename, "notes.db");
        assert!(!snapshot.byte_array.is_empty());

        let closed = gateway
            .close(Some(CloseArgs { unlink: true }))
            .await
            .unwrap();
        assert_eq!(closed.filename.as_deref(), Some("notes.db"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_before_ready() {
        let (gateway, release) = gated();

        let open = gateway.open("busy.db", None);
        let configs = future::join_all((0..8).map(|_| gateway.introspect()));
        let release = async move {
            tokio::task::yield_now().await;
            release.send(()).unwrap();
        };

        let (opened, configs, ()) = tokio::join!(open, configs, release);
        assert_eq!(opened.unwrap().filename, "busy.db");
        assert!(configs.into_iter().all(|c| c.is_ok()));
    }

    #[tokio::test]
    async fn test_engine_errors_surface_verbatim() {
        let gateway = Gateway::spawn_worker(MemoryEngine::new(), WorkerConfig::default());

        let err = gateway.export().await.unwrap_err();
        let fault = err.fault().expect("engine fault");
        assert_eq!(fault.operation, "export");
        assert_eq!(fault.message, "No open database");

        let closed = gateway.close(None).await.unwrap();
        assert_eq!(closed.filename, None);
    }

    #[tokio::test]
    async fn test_startup_failure_is_shared() {
        let gateway = Gateway::new(future::ready(Err::<WorkerChannel, _>(
            ChannelError::Engine(Fault::new("init", "Error", "no worker support")),
        )));

        let first = gateway.open("a.db", None).await.unwrap_err();
        let second = gateway.introspect().await.unwrap_err();
        assert_eq!(first, second);
        assert_eq!(first.fault().map(|f| f.message.as_str()), Some("no worker support"));
        assert!(!gateway.is_ready());
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_rejected() {
        let gateway = Gateway::spawn_worker(ConfusedEngine, WorkerConfig::default());

        let err = gateway.open("a.db", None).await.unwrap_err();
        assert_eq!(
            err,
            ChannelError::UnexpectedResponse {
                expected: "open",
                got: "close",
            }
        );
        assert!(gateway.close(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_global_gateway_is_created_once() {
        let first = Gateway::global_with(|| {
            Gateway::spawn_worker(MemoryEngine::new(), WorkerConfig::new("global"))
        });
        let second = Gateway::global_with(|| unreachable!("global gateway already set"));

        assert!(std::ptr::eq(first, second));
        assert!(Gateway::global().is_some_and(|gateway| std::ptr::eq(gateway, first)));
        first.ready().await.unwrap();
        assert!(second.is_ready());
    }
}
