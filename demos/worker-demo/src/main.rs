//! Demo wiring a gateway, keyed debounce and deferred flattening together.
//!
//! Run with: cargo run -p worker-demo
//!
//! Set `RUST_LOG=debug` to watch readiness, superseded calls and routing.

use std::time::Duration;

use anyhow::Result;
use dbworker_core::{DebounceOptions, Deferred, debounce, flatten};
use dbworker_gateway::{ExecOptions, Gateway, MemoryEngine, WorkerConfig, protocol::RowMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let gateway = Gateway::spawn_worker(MemoryEngine::new(), WorkerConfig::new("demo"));

    // No explicit wait: the call queues behind readiness.
    let opened = gateway.open("file:demo.db?vfs=opfs", None).await?;
    tracing::info!(db_id = %opened.db_id, persistent = opened.persistent, "Opened {}", opened.filename);

    let config = gateway.introspect().await?;
    tracing::info!("Engine config: {}", serde_json::to_string(&config)?);

    gateway.execute("CREATE TABLE notes(body TEXT)").await?;

    // Simulated keystrokes: only the last query runs, earlier ones keep the old text.
    let mut searches = Vec::new();
    let mut previous = String::new();
    for text in ["n", "no", "not", "note"] {
        let gateway = gateway.clone();
        let query = text.to_owned();
        let options = DebounceOptions::new(previous.clone())
            .with_ref("search")
            .with_delay(Duration::from_millis(150));

        searches.push(debounce(
            move || async move {
                let sql = format!("SELECT body FROM notes WHERE body LIKE '%{query}%'");
                gateway
                    .execute(ExecOptions::new(sql).with_rows(RowMode::Object))
                    .await
                    .map(|_| query)
            },
            options,
        ));
        previous = text.to_owned();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    for search in searches {
        tracing::info!("Search settled on {:?}", search.await?);
    }

    let size = {
        let gateway = gateway.clone();
        Deferred::pending(async move {
            Deferred::from_future(async move {
                gateway
                    .export()
                    .await
                    .map(|snapshot| snapshot.byte_array.len())
            })
        })
    };
    tracing::info!("Snapshot size: {} bytes", flatten(size).await?);

    let closed = gateway.close(None).await?;
    tracing::info!("Closed {:?}", closed.filename);

    Ok(())
}
