//! Mirrors the source's `examples/redis/main.go` driver: add a few
//! tasks, remove one before it's due, and let the poll loop drain the
//! rest. Runs against `MemoryStore` since this crate ships no network
//! client — swap it for a real `Store` implementation in production.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use timewheel_distributed::{DistributedWheel, FnHandler, MemoryStore, Store, Task};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let handler = Arc::new(FnHandler(|task: Task| async move {
        tracing::info!(key = %task.key, msg = %task.msg, "task");
        Ok::<(), timewheel_distributed::HandlerError>(())
    }));

    let wheel = DistributedWheel::new(store, handler);
    let now = Utc::now();

    wheel.add("test1", Task::new("msg1", "test"), now + chrono::Duration::seconds(1)).await?;

    let removed_at = now + chrono::Duration::seconds(140);
    wheel.add("test2", Task::new("msg2", "test"), removed_at).await?;
    wheel.remove("test2", removed_at).await?;

    wheel.add("test3", Task::new("msg3", "test"), now + chrono::Duration::seconds(120)).await?;
    wheel.add("test4", Task::new("msg4", "test"), now + chrono::Duration::seconds(130)).await?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    wheel.stop();
    Ok(())
}
