//! Time as a dependency.
//!
//! Every scheduling decision in both wheels — slot/cycle math, bucket
//! selection, TTL computation — consults "now". Injecting it through a
//! trait instead of calling `Utc::now()` directly keeps that math
//! testable without real sleeps.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock, backed by the OS wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests. Starts at the instant it is created
/// and only moves when explicitly advanced.
#[derive(Debug, Clone)]
pub struct MockClock(Arc<Mutex<DateTime<Utc>>>);

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().expect("mock clock poisoned") = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.0.lock().expect("mock clock poisoned");
        *guard = *guard + by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().expect("mock clock poisoned")
    }
}
