//! Hashed timing wheel: a fixed-size ring of slots, each holding an
//! insertion-ordered set of pending tasks, driven by a single ticker.
//!
//! A single worker task owns all mutable state (`slots`, `cur_slot`,
//! the key index) and serializes admission, removal, and tick
//! processing by draining two channels and a ticker in one `select!`
//! loop — the message-passing admission pattern from the source, kept
//! as-is rather than protected by a mutex.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use timewheel_core::clock::{Clock, SystemClock};
use timewheel_core::error::{Error, Result};
use tokio::sync::{mpsc, Notify};

const DEFAULT_SLOT_COUNT: usize = 10;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
/// Capacity of the admission channels. Kept at 1 to approximate the
/// unbuffered-channel hand-off of the source: `add`/`remove` block
/// until the worker dequeues the request, not until it is processed.
const ADMISSION_CHANNEL_CAPACITY: usize = 1;

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    action: Action,
    cycle: u64,
}

struct AddRequest {
    key: String,
    action: Action,
    pos: usize,
    cycle: u64,
}

/// In-process hashed timing wheel.
///
/// Cloning a `LocalWheel` shares the same worker and state; there is
/// exactly one worker task per construction, regardless of how many
/// clones of the handle exist.
pub struct LocalWheel {
    add_tx: mpsc::Sender<AddRequest>,
    remove_tx: mpsc::Sender<String>,
    stop_notify: Arc<Notify>,
    stop_once: Arc<Once>,
    alive: Arc<AtomicBool>,
    cur_slot: Arc<AtomicUsize>,
    clock: Arc<dyn Clock>,
    slot_count: usize,
    interval: Duration,
}

impl Clone for LocalWheel {
    fn clone(&self) -> Self {
        Self {
            add_tx: self.add_tx.clone(),
            remove_tx: self.remove_tx.clone(),
            stop_notify: Arc::clone(&self.stop_notify),
            stop_once: Arc::clone(&self.stop_once),
            alive: Arc::clone(&self.alive),
            cur_slot: Arc::clone(&self.cur_slot),
            clock: Arc::clone(&self.clock),
            slot_count: self.slot_count,
            interval: self.interval,
        }
    }
}

impl LocalWheel {
    /// `slot_count <= 0` collapses to 10, `interval <= 0` to 1 second,
    /// matching the source's `NewTimeWheel` defaults.
    pub fn new(slot_count: usize, interval: Duration) -> Self {
        Self::with_clock(slot_count, interval, Arc::new(SystemClock))
    }

    pub fn with_clock(slot_count: usize, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let slot_count = if slot_count == 0 { DEFAULT_SLOT_COUNT } else { slot_count };
        let interval = if interval.is_zero() { DEFAULT_INTERVAL } else { interval };

        let (add_tx, add_rx) = mpsc::channel(ADMISSION_CHANNEL_CAPACITY);
        let (remove_tx, remove_rx) = mpsc::channel(ADMISSION_CHANNEL_CAPACITY);
        let stop_notify = Arc::new(Notify::new());
        let alive = Arc::new(AtomicBool::new(true));
        let cur_slot = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            slots: (0..slot_count).map(|_| IndexMap::new()).collect(),
            key_index: HashMap::new(),
            cur_slot_idx: 0,
            cur_slot_shared: Arc::clone(&cur_slot),
        };

        let run_fut = worker.run(add_rx, remove_rx, tokio::time::interval(interval), Arc::clone(&stop_notify));
        let alive_for_task = Arc::clone(&alive);
        tokio::spawn(async move {
            if std::panic::AssertUnwindSafe(run_fut).catch_unwind().await.is_err() {
                tracing::error!("local timewheel worker panicked; scheduler is now dead");
                alive_for_task.store(false, Ordering::SeqCst);
            }
        });

        Self {
            add_tx,
            remove_tx,
            stop_notify,
            stop_once: Arc::new(Once::new()),
            alive,
            cur_slot,
            clock,
            slot_count,
            interval,
        }
    }

    /// Submit `action` to run once at `execute_at`, replacing any
    /// pending task already registered under `key`. Blocks until the
    /// worker accepts the request (not until it runs).
    pub async fn add<F>(&self, key: impl Into<String>, action: F, execute_at: DateTime<Utc>) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (pos, cycle) = self.pos_and_cycle(execute_at);
        self.add_tx
            .send(AddRequest { key: key.into(), action: Box::new(action), pos, cycle })
            .await
            .map_err(|_| Error::SchedulerStopped)
    }

    /// Remove a pending task by key. A no-op if the key is absent or
    /// has already fired.
    pub async fn remove(&self, key: impl Into<String>) -> Result<()> {
        self.remove_tx.send(key.into()).await.map_err(|_| Error::SchedulerStopped)
    }

    /// Idempotent; only the first call has any effect.
    pub fn stop(&self) {
        let notify = Arc::clone(&self.stop_notify);
        self.stop_once.call_once(move || {
            notify.notify_one();
        });
    }

    /// `false` once the worker has panicked and died. Not affected by
    /// `stop()` — a stopped-but-healthy wheel still reports `true`.
    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn pos_and_cycle(&self, execute_at: DateTime<Utc>) -> (usize, u64) {
        let delay_ms = (execute_at - self.clock.now()).num_milliseconds();
        let cur_slot = self.cur_slot.load(Ordering::Relaxed) as i64;
        let slot_count = self.slot_count as i64;
        if delay_ms <= 0 {
            // Already due: land on the slot currently being scanned,
            // with nothing left to wait out.
            return (cur_slot as usize, 0);
        }
        let interval_ms = (self.interval.as_millis() as i64).max(1);
        let steps = delay_ms / interval_ms;
        let cycle = (steps / slot_count) as u64;
        let pos = (cur_slot + steps).rem_euclid(slot_count) as usize;
        (pos, cycle)
    }
}

struct Worker {
    slots: Vec<IndexMap<String, Entry>>,
    key_index: HashMap<String, usize>,
    cur_slot_idx: usize,
    cur_slot_shared: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(
        mut self,
        mut add_rx: mpsc::Receiver<AddRequest>,
        mut remove_rx: mpsc::Receiver<String>,
        mut ticker: tokio::time::Interval,
        stop_notify: Arc<Notify>,
    ) {
        loop {
            tokio::select! {
                _ = stop_notify.notified() => {
                    tracing::debug!("local timewheel stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
                req = add_rx.recv() => {
                    match req {
                        Some(req) => self.add_task(req),
                        None => return,
                    }
                }
                key = remove_rx.recv() => {
                    match key {
                        Some(key) => self.remove_task(&key),
                        None => return,
                    }
                }
            }
        }
    }

    fn add_task(&mut self, req: AddRequest) {
        if let Some(prev_slot) = self.key_index.remove(&req.key) {
            self.slots[prev_slot].shift_remove(&req.key);
        }
        self.slots[req.pos].insert(req.key.clone(), Entry { action: req.action, cycle: req.cycle });
        self.key_index.insert(req.key, req.pos);
    }

    fn remove_task(&mut self, key: &str) {
        if let Some(slot) = self.key_index.remove(key) {
            self.slots[slot].shift_remove(key);
        }
    }

    fn tick(&mut self) {
        let slot = &mut self.slots[self.cur_slot_idx];
        let mut due = Vec::new();
        for (key, entry) in slot.iter_mut() {
            if entry.cycle > 0 {
                entry.cycle -= 1;
            } else {
                due.push(key.clone());
            }
        }
        for key in due {
            if let Some(entry) = slot.shift_remove(&key) {
                self.key_index.remove(&key);
                // Dispatched on its own task: a long-running or
                // panicking action must never delay or poison the tick
                // loop.
                tokio::spawn(async move { (entry.action)() });
            }
        }
        self.cur_slot_idx = (self.cur_slot_idx + 1) % self.slots.len();
        self.cur_slot_shared.store(self.cur_slot_idx, Ordering::Relaxed);
    }
}
