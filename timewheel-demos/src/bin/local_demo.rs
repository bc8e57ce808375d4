//! Mirrors the source's `examples/redis/main.go` driver shape, but for
//! the in-process wheel: add a handful of tasks, replace one, remove
//! another, then let the process idle while the wheel drains them.

use chrono::Utc;
use std::time::Duration;
use timewheel_local::LocalWheel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let wheel = LocalWheel::new(10, Duration::from_secs(1));
    let now = Utc::now();

    wheel
        .add("test1", || tracing::info!(task = "test1", "fired"), now + chrono::Duration::seconds(1))
        .await?;

    let removed_at = now + chrono::Duration::seconds(140);
    wheel.add("test2", || tracing::info!(task = "test2", "fired"), removed_at).await?;
    wheel.remove("test2").await?;

    wheel
        .add("test3", || tracing::info!(task = "test3", "fired"), now + chrono::Duration::seconds(3))
        .await?;
    wheel
        .add("test4", || tracing::info!(task = "test4", "fired"), now + chrono::Duration::seconds(5))
        .await?;

    tokio::time::sleep(Duration::from_secs(8)).await;
    wheel.stop();
    Ok(())
}
