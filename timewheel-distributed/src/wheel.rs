//! The store-backed distributed timing wheel.
//!
//! Unlike [`timewheel_local::LocalWheel`], the poll loop owns no
//! scheduling state of its own — every mutable fact about pending
//! tasks lives in the store (see `crate::memory_store`). The loop's
//! only job each second is: ask the store what is due, tombstone-
//! filter it, and fan the survivors out to the handler.

use crate::store::{Arg, Reply, Script, Store};
use crate::task::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::{Arc, Once};
use std::time::Duration;
use timewheel_core::bucket::{delete_bucket, floor_to_second, minute_bucket};
use timewheel_core::clock::{Clock, SystemClock};
use timewheel_core::error::{Error, Result};
use tokio::sync::Notify;
use tokio::task::JoinSet;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_DEADLINE: Duration = Duration::from_secs(30);

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The application callback invoked for every task a poll deems due
/// and not tombstoned. Corresponds to the source's
/// `func(context.Context, *RTaskElement) error`; cancellation is
/// expressed structurally (dropping the future) rather than through a
/// threaded context, via the 30 s timeout around the whole batch.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, task: Task) -> std::result::Result<(), HandlerError>;
}

/// Adapts a plain async closure to [`Handler`], for callers who don't
/// need a dedicated type (mirrors the source's bare `handle` function
/// passed to `NewRTimeWheel`).
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = std::result::Result<(), HandlerError>> + Send,
{
    async fn handle(&self, task: Task) -> std::result::Result<(), HandlerError> {
        (self.0)(task).await
    }
}

/// Store-backed distributed hashed timing wheel.
///
/// Cloning shares the same underlying poll loop; there is exactly one
/// poll loop task per construction.
pub struct DistributedWheel {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    stop_notify: Arc<Notify>,
    stop_once: Arc<Once>,
}

impl Clone for DistributedWheel {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            stop_notify: Arc::clone(&self.stop_notify),
            stop_once: Arc::clone(&self.stop_once),
        }
    }
}

impl DistributedWheel {
    pub fn new(store: Arc<dyn Store>, handler: Arc<dyn Handler>) -> Self {
        Self::with_clock(store, handler, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn Store>, handler: Arc<dyn Handler>, clock: Arc<dyn Clock>) -> Self {
        let stop_notify = Arc::new(Notify::new());

        let loop_store = Arc::clone(&store);
        let loop_clock = Arc::clone(&clock);
        let loop_stop = Arc::clone(&stop_notify);
        tokio::spawn(run(loop_store, handler, loop_clock, loop_stop));

        Self { store, clock, stop_notify, stop_once: Arc::new(Once::new()) }
    }

    /// Adds a task under `key`, due at `execute_at`. Fails with
    /// [`Error::InvalidArgument`] if `task.msg` or `task.type_` is
    /// empty, matching the source's `addTaskPrecheck`.
    pub async fn add(&self, key: impl Into<String>, mut task: Task, execute_at: DateTime<Utc>) -> Result<()> {
        if task.msg.is_empty() || task.type_.is_empty() {
            return Err(Error::InvalidArgument(format!("msg:{} type:{} should not be empty", task.msg, task.type_)));
        }
        let key = key.into();
        task.key = key.clone();
        task.execute_at_unix = execute_at.timestamp();
        let serialized = task.encode()?;

        self.store
            .eval(
                Script::AddTask,
                &[minute_bucket(execute_at), delete_bucket(execute_at)],
                &[Arg::Int(execute_at.timestamp()), Arg::Str(serialized), Arg::Str(key)],
            )
            .await
            .map(|_| ())
    }

    /// Tombstones `key` within `execute_at`'s minute bucket. The TTL
    /// attached to the tombstone is `(execute_at - now) + 3600` seconds
    /// so it outlives any task it might suppress (spec §3).
    pub async fn remove(&self, key: impl Into<String>, execute_at: DateTime<Utc>) -> Result<()> {
        let now = self.clock.now();
        let ttl_seconds = (execute_at - now).num_seconds() + 3600;
        self.store
            .eval(Script::DeleteTask, &[delete_bucket(execute_at)], &[Arg::Str(key.into()), Arg::Int(ttl_seconds)])
            .await
            .map(|_| ())
    }

    /// Idempotent; only the first call has any effect.
    pub fn stop(&self) {
        let notify = Arc::clone(&self.stop_notify);
        self.stop_once.call_once(move || {
            notify.notify_one();
        });
    }
}

async fn run(store: Arc<dyn Store>, handler: Arc<dyn Handler>, clock: Arc<dyn Clock>, stop_notify: Arc<Notify>) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = stop_notify.notified() => {
                tracing::debug!("distributed timewheel stopping");
                return;
            }
            _ = ticker.tick() => {
                let store = Arc::clone(&store);
                let handler = Arc::clone(&handler);
                let clock = Arc::clone(&clock);
                // Each tick's poll is its own task: a slow poll never
                // delays the next tick, matching the source's `go
                // r.executeTasks()` inside the ticker branch.
                tokio::spawn(async move {
                    if tokio::time::timeout(BATCH_DEADLINE, poll_once(store, handler, clock)).await.is_err() {
                        tracing::error!("poll exceeded its 30s batch deadline; abandoning in-flight work");
                    }
                });
            }
        }
    }
}

async fn poll_once(store: Arc<dyn Store>, handler: Arc<dyn Handler>, clock: Arc<dyn Clock>) {
    let now = clock.now();
    let minute_bkt = minute_bucket(now);
    let delete_bkt = delete_bucket(now);
    let now_second = floor_to_second(now);
    let score_lo = now_second.timestamp();
    let score_hi = score_lo + 1;

    let reply = match store.eval(Script::RangeTasks, &[minute_bkt, delete_bkt], &[Arg::Int(score_lo), Arg::Int(score_hi)]).await
    {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(error = %err, "range_tasks failed; abandoning this tick");
            return;
        }
    };

    let Reply::List(mut items) = reply else {
        tracing::error!("range_tasks returned a malformed reply shape");
        return;
    };
    if items.is_empty() {
        tracing::error!("range_tasks returned an empty reply, expected at least the tombstone list");
        return;
    }

    let tombstone_reply = items.remove(0);
    let tombstoned: HashSet<String> = match tombstone_reply {
        Reply::List(members) => members.into_iter().filter_map(bytes_to_string).collect(),
        _ => HashSet::new(),
    };

    let mut in_flight = JoinSet::new();
    for item in items {
        let Reply::Bytes(raw) = item else { continue };
        let raw = match String::from_utf8(raw) {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!("skipping task record: not valid utf-8");
                continue;
            }
        };
        let task = match Task::decode(&raw) {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!(error = %err, raw_task = %raw, "skipping malformed task record");
                continue;
            }
        };
        if tombstoned.contains(&task.key) {
            continue;
        }

        let handler = Arc::clone(&handler);
        let key = task.key.clone();
        in_flight.spawn(async move {
            let outcome = match std::panic::AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => Error::HandlerFailure { key: key.clone(), reason: err.to_string() },
                Err(_) => Error::HandlerFailure { key: key.clone(), reason: "handler panicked".to_string() },
            };
            tracing::error!(task_key = %key, error = %outcome, "handler failed");
        });
    }

    while in_flight.join_next().await.is_some() {}
}

fn bytes_to_string(reply: Reply) -> Option<String> {
    match reply {
        Reply::Bytes(b) => String::from_utf8(b).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use timewheel_core::clock::MockClock;

    struct RecordingHandler {
        seen: StdMutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl RecordingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self { seen: StdMutex::new(Vec::new()), calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        async fn handle(&self, task: Task) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(task.key);
            Ok(())
        }
    }

    async fn advance(clock: &MockClock, by: Duration) {
        tokio::time::advance(by).await;
        clock.advance(chrono::Duration::from_std(by).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn a_task_due_this_second_is_handled_on_the_covering_poll() {
        let start = Utc::now();
        let clock = Arc::new(MockClock::new(start));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let handler = RecordingHandler::new();
        let wheel = DistributedWheel::with_clock(store, handler.clone(), Arc::clone(&clock));

        wheel.add("test1", Task::new("msg1", "test"), start + chrono::Duration::seconds(1)).await.unwrap();

        for _ in 0..5 {
            advance(&clock, Duration::from_secs(1)).await;
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.seen.lock().unwrap().as_slice(), ["test1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_before_the_covering_poll_suppresses_the_task() {
        let start = Utc::now();
        let clock = Arc::new(MockClock::new(start));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let handler = RecordingHandler::new();
        let wheel = DistributedWheel::with_clock(store, handler.clone(), Arc::clone(&clock));

        let at = start + chrono::Duration::seconds(4);
        wheel.add("test2", Task::new("m", "t"), at).await.unwrap();
        wheel.remove("test2", at).await.unwrap();

        for _ in 0..8 {
            advance(&clock, Duration::from_secs(1)).await;
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn add_rejects_empty_msg_or_type() {
        let start = Utc::now();
        let clock = Arc::new(MockClock::new(start));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let handler = RecordingHandler::new();
        let wheel = DistributedWheel::with_clock(store, handler, Arc::clone(&clock));

        let err = wheel.add("x", Task::new("", "t"), start + chrono::Duration::seconds(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_add_invokes_the_handler_twice() {
        let start = Utc::now();
        let clock = Arc::new(MockClock::new(start));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let handler = RecordingHandler::new();
        let wheel = DistributedWheel::with_clock(store, handler.clone(), Arc::clone(&clock));

        let at = start + chrono::Duration::seconds(2);
        wheel.add("y", Task::new("m", "t"), at).await.unwrap();
        wheel.add("y", Task::new("m", "t"), at).await.unwrap();

        for _ in 0..6 {
            advance(&clock, Duration::from_secs(1)).await;
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
        let handler = RecordingHandler::new();
        let wheel = DistributedWheel::with_clock(store, handler, Arc::clone(&clock));

        wheel.stop();
        wheel.stop();
    }
}
