//! In-process hashed timing wheel scheduler.
//!
//! At-most-once execution, no durability: state lives entirely in
//! memory and is lost on restart. See `timewheel-distributed` for the
//! store-backed, at-least-once counterpart.

mod wheel;

pub use wheel::LocalWheel;
