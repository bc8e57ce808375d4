//! In-process stand-in for a real store client (e.g. Redis).
//!
//! [`MemoryStore`] implements the three atomic scripts from
//! `crate::store::Script` against plain in-memory maps guarded by
//! `tokio::sync::Mutex`, instead of the wire-level client this crate
//! deliberately leaves out of scope. It is what the demo binaries and
//! the crate's own tests run against; a production deployment swaps it
//! for a `Store` backed by a real Redis connection pool.

use crate::store::{Arg, Reply, Script, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use timewheel_core::clock::{Clock, SystemClock};
use timewheel_core::error::Error;
use tokio::sync::Mutex;

/// How far past the latest task score a minute bucket's bookkeeping
/// expiry is pushed out. The source never attaches a TTL to the task
/// sorted-set key at all (open question in the design doc); this is
/// the "at least two minutes past the latest expected execution"
/// resolution.
const BUCKET_TTL_PAD_MINUTES: i64 = 2;

#[derive(Default)]
struct SortedSet {
    members: Vec<(String, i64)>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StringSet {
    members: HashSet<String>,
    expires_at: Option<DateTime<Utc>>,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    sorted_sets: Mutex<HashMap<String, SortedSet>>,
    tombstones: Mutex<HashMap<String, StringSet>>,
    plain_sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sorted_sets: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
            plain_sets: Mutex::new(HashMap::new()),
        }
    }

    async fn add_task(&self, keys: &[String], args: &[Arg]) -> Result<Reply, Error> {
        let minute_bkt = expect_key(keys, 0)?;
        let score = expect_int(args, 0)?;
        let serialized = expect_str(args, 1)?;

        let mut sets = self.sorted_sets.lock().await;
        let set = sets.entry(minute_bkt.to_string()).or_default();
        // No existence check: a second `add_task` for the same key
        // appends a second member, matching the source's duplicate
        // admission behavior (spec §4.2 "Duplicate admission").
        set.members.push((serialized.to_string(), score));

        let candidate_expiry =
            DateTime::<Utc>::from_timestamp(score, 0).unwrap_or_else(|| self.clock.now())
                + chrono::Duration::minutes(BUCKET_TTL_PAD_MINUTES);
        set.expires_at = Some(set.expires_at.map_or(candidate_expiry, |cur| cur.max(candidate_expiry)));

        // The open question on whether `add_task` should clear a
        // pre-existing tombstone for `key` is resolved conservatively
        // here: it does not. Remove-wins survives any add-remove-add
        // interleaving within a minute. See DESIGN.md.
        Ok(Reply::Nil)
    }

    async fn delete_task(&self, keys: &[String], args: &[Arg]) -> Result<Reply, Error> {
        let delete_bkt = expect_key(keys, 0)?;
        let key = expect_str(args, 0)?;
        let ttl_seconds = expect_int(args, 1)?;

        let mut sets = self.tombstones.lock().await;
        let set = sets.entry(delete_bkt.to_string()).or_default();
        set.members.insert(key.to_string());
        set.expires_at = Some(self.clock.now() + chrono::Duration::seconds(ttl_seconds.max(0)));
        Ok(Reply::Nil)
    }

    async fn range_tasks(&self, keys: &[String], args: &[Arg]) -> Result<Reply, Error> {
        let minute_bkt = expect_key(keys, 0)?;
        let delete_bkt = expect_key(keys, 1)?;
        let score_lo = expect_int(args, 0)?;
        let score_hi = expect_int(args, 1)?;
        let now = self.clock.now();

        let tombstoned = {
            let mut sets = self.tombstones.lock().await;
            match sets.get(delete_bkt) {
                Some(set) if set.expires_at.map_or(true, |exp| exp > now) => {
                    set.members.iter().cloned().collect::<Vec<_>>()
                }
                Some(_) => {
                    sets.remove(delete_bkt);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };

        let tasks = {
            let mut sets = self.sorted_sets.lock().await;
            match sets.get(minute_bkt) {
                Some(set) if set.expires_at.map_or(true, |exp| exp > now) => set
                    .members
                    .iter()
                    .filter(|(_, score)| *score >= score_lo && *score < score_hi)
                    .map(|(member, _)| member.clone())
                    .collect::<Vec<_>>(),
                Some(_) => {
                    sets.remove(minute_bkt);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };

        let mut reply = Vec::with_capacity(1 + tasks.len());
        reply.push(Reply::List(tombstoned.into_iter().map(|k| Reply::Bytes(k.into_bytes())).collect()));
        reply.extend(tasks.into_iter().map(|t| Reply::Bytes(t.into_bytes())));
        Ok(Reply::List(reply))
    }
}

fn expect_key(keys: &[String], index: usize) -> Result<&str, Error> {
    keys.get(index).map(String::as_str).ok_or_else(|| Error::StoreUnavailable(format!("missing key at index {index}")))
}

fn expect_str(args: &[Arg], index: usize) -> Result<&str, Error> {
    match args.get(index) {
        Some(Arg::Str(s)) => Ok(s.as_str()),
        _ => Err(Error::StoreUnavailable(format!("expected string argument at index {index}"))),
    }
}

fn expect_int(args: &[Arg], index: usize) -> Result<i64, Error> {
    match args.get(index) {
        Some(Arg::Int(n)) => Ok(*n),
        _ => Err(Error::StoreUnavailable(format!("expected integer argument at index {index}"))),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<i64, Error> {
        let mut sets = self.plain_sets.lock().await;
        let set = sets.entry(key.to_string()).or_default();
        Ok(if set.insert(member.to_string()) { 1 } else { 0 })
    }

    async fn eval(&self, script: Script, keys: &[String], args: &[Arg]) -> Result<Reply, Error> {
        match script {
            Script::AddTask => self.add_task(keys, args).await,
            Script::DeleteTask => self.delete_task(keys, args).await,
            Script::RangeTasks => self.range_tasks(keys, args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timewheel_core::clock::MockClock;

    fn args(vals: Vec<Arg>) -> Vec<Arg> {
        vals
    }

    #[tokio::test]
    async fn add_then_range_returns_the_task_with_empty_tombstones() {
        let start = Utc::now();
        let score = start.timestamp();
        let store = MemoryStore::with_clock(Arc::new(MockClock::new(start)));
        let minute = "timewheel_task_{202607281015}".to_string();
        let delset = "timewheel_delset_{202607281015}".to_string();

        store
            .eval(
                Script::AddTask,
                &[minute.clone(), delset.clone()],
                &args(vec![Arg::Int(score), Arg::Str("payload".into()), Arg::Str("k1".into())]),
            )
            .await
            .unwrap();

        let Reply::List(items) = store
            .eval(Script::RangeTasks, &[minute, delset], &args(vec![Arg::Int(score), Arg::Int(score + 1)]))
            .await
            .unwrap()
        else {
            panic!("expected list reply");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Reply::List(v) if v.is_empty()));
        assert!(matches!(&items[1], Reply::Bytes(b) if b == b"payload"));
    }

    #[tokio::test]
    async fn duplicate_add_task_produces_two_members() {
        let start = Utc::now();
        let score = start.timestamp();
        let store = MemoryStore::with_clock(Arc::new(MockClock::new(start)));
        let minute = "timewheel_task_{202607281015}".to_string();
        let delset = "timewheel_delset_{202607281015}".to_string();

        for _ in 0..2 {
            store
                .eval(
                    Script::AddTask,
                    &[minute.clone(), delset.clone()],
                    &args(vec![Arg::Int(score), Arg::Str("payload".into()), Arg::Str("k1".into())]),
                )
                .await
                .unwrap();
        }

        let Reply::List(items) = store
            .eval(Script::RangeTasks, &[minute, delset], &args(vec![Arg::Int(score), Arg::Int(score + 1)]))
            .await
            .unwrap()
        else {
            panic!("expected list reply");
        };
        assert_eq!(items.len(), 3, "tombstone list + two duplicate task members");
    }

    #[tokio::test]
    async fn tombstoned_key_is_reported_regardless_of_task_presence() {
        let store = MemoryStore::new();
        let delset = "timewheel_delset_{202607281015}".to_string();

        store.eval(Script::DeleteTask, &[delset.clone()], &args(vec![Arg::Str("k1".into()), Arg::Int(3600)])).await.unwrap();

        let minute = "timewheel_task_{202607281015}".to_string();
        let Reply::List(items) =
            store.eval(Script::RangeTasks, &[minute, delset], &args(vec![Arg::Int(0), Arg::Int(1)])).await.unwrap()
        else {
            panic!("expected list reply");
        };
        let Reply::List(tombstones) = &items[0] else { panic!("expected nested list") };
        assert_eq!(tombstones.len(), 1);
    }

    #[tokio::test]
    async fn an_expired_tombstone_bucket_is_no_longer_reported() {
        let start = Utc::now();
        let clock = MockClock::new(start);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let delset = "timewheel_delset_{202607281015}".to_string();
        let minute = "timewheel_task_{202607281015}".to_string();

        store.eval(Script::DeleteTask, &[delset.clone()], &args(vec![Arg::Str("k1".into()), Arg::Int(10)])).await.unwrap();
        clock.advance(chrono::Duration::seconds(11));

        let Reply::List(items) =
            store.eval(Script::RangeTasks, &[minute, delset], &args(vec![Arg::Int(0), Arg::Int(1)])).await.unwrap()
        else {
            panic!("expected list reply");
        };
        let Reply::List(tombstones) = &items[0] else { panic!("expected nested list") };
        assert!(tombstones.is_empty());
    }

    #[tokio::test]
    async fn sadd_reports_whether_the_member_was_newly_inserted() {
        let store = MemoryStore::new();
        assert_eq!(store.sadd("set1", "m1").await.unwrap(), 1);
        assert_eq!(store.sadd("set1", "m1").await.unwrap(), 0);
    }
}
