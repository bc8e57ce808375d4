//! The backing-store contract.
//!
//! The wire-level store client (connection pooling, retries, network
//! I/O) is explicitly out of scope for this crate — [`Store`] is the
//! narrow interface a real client is consumed through. This crate ships
//! only [`crate::memory_store::MemoryStore`], an in-process stand-in
//! used by tests and the demo binaries.

use async_trait::async_trait;
use timewheel_core::error::Error;

/// The three server-side scripts the distributed wheel relies on for
/// atomicity. See each variant's doc comment for its keys/args/effect;
/// a concrete `Store` is expected to execute each of these as a single
/// atomic unit (e.g. a Lua script under Redis `EVAL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Keys `[minute_bucket, delete_bucket]`, args
    /// `[score, serialized_task, key]`. Adds `(serialized_task, score)`
    /// to the sorted set at `minute_bucket`. Does not touch
    /// `delete_bucket` (see the open question on tombstone-clearing in
    /// DESIGN.md).
    AddTask,
    /// Keys `[delete_bucket]`, args `[key, ttl_seconds]`. Adds `key` to
    /// the set at `delete_bucket` and (re-)applies its expiration.
    DeleteTask,
    /// Keys `[minute_bucket, delete_bucket]`, args
    /// `[score_lo, score_hi]`. Returns a sequence whose first element
    /// is the full membership of `delete_bucket`, and whose remaining
    /// elements are the members of `minute_bucket` with score in
    /// `[score_lo, score_hi)`.
    RangeTasks,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Int(i64),
    Str(String),
}

/// Projection of a store script reply: either a nested sequence, an
/// opaque byte string, or an integer — a sum type standing in for
/// whatever heterogeneous reply format the concrete store protocol
/// uses (e.g. RESP for Redis).
#[derive(Debug, Clone)]
pub enum Reply {
    List(Vec<Reply>),
    Bytes(Vec<u8>),
    Int(i64),
    Nil,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// `SADD key member` — add a single member to a set, returning the
    /// number of members actually added (0 if already present).
    async fn sadd(&self, key: &str, member: &str) -> Result<i64, Error>;

    /// Execute `script` atomically against `keys` with `args`.
    async fn eval(&self, script: Script, keys: &[String], args: &[Arg]) -> Result<Reply, Error>;
}

/// Connection-pool configuration for a concrete [`Store`] client.
/// Mirrors the source's functional-options `ClientOptions` as a
/// builder — the idiomatic Rust rendering of the same configuration
/// surface. `MemoryStore` ignores this entirely; it exists for real
/// network-backed implementations.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub network: String,
    pub address: String,
    pub password: String,
    pub max_idle: u32,
    pub max_active: u32,
    pub idle_timeout_seconds: u32,
    pub wait: bool,
    pub db: u32,
}

impl StoreConfig {
    pub fn new(network: impl Into<String>, address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            password: password.into(),
            max_idle: 20,
            max_active: 100,
            idle_timeout_seconds: 10,
            wait: false,
            db: 0,
        }
    }

    pub fn with_max_idle(mut self, max_idle: u32) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_max_active(mut self, max_active: u32) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_idle_timeout_seconds(mut self, seconds: u32) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_client_options() {
        let cfg = StoreConfig::new("tcp", "localhost:6379", "");
        assert_eq!(cfg.max_idle, 20);
        assert_eq!(cfg.max_active, 100);
        assert_eq!(cfg.idle_timeout_seconds, 10);
        assert!(!cfg.wait);
        assert_eq!(cfg.db, 0);
    }

    #[test]
    fn builder_methods_override_individual_fields() {
        let cfg = StoreConfig::new("tcp", "localhost:6379", "secret").with_max_idle(5).with_wait(true).with_db(2);
        assert_eq!(cfg.max_idle, 5);
        assert!(cfg.wait);
        assert_eq!(cfg.db, 2);
        assert_eq!(cfg.max_active, 100);
    }
}
