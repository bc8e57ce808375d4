//! Deterministic mapping from wall-clock instants to the store key
//! namespace used by the distributed wheel.
//!
//! The brace-wrapped minute string (`{YYYYMMDDHHMM}`) is a routing hash
//! tag: sharded store deployments hash only the braced portion of a
//! key, so the task bucket and its tombstone bucket for the same
//! minute always land on the same shard — a prerequisite for the
//! atomic multi-key scripts in the script layer.

use chrono::{DateTime, Timelike, Utc};

fn minute_str(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d%H%M").to_string()
}

pub fn minute_bucket(t: DateTime<Utc>) -> String {
    format!("timewheel_task_{{{}}}", minute_str(t))
}

pub fn delete_bucket(t: DateTime<Utc>) -> String {
    format!("timewheel_delset_{{{}}}", minute_str(t))
}

/// `t` with sub-second components zeroed.
pub fn floor_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).expect("0 is always a valid nanosecond component")
}
