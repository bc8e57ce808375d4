//! Store-backed distributed hashed timing wheel.
//!
//! At-least-once execution, durable across restarts: all scheduling
//! state lives in the store (see [`store::Store`]), fanned across
//! however many processes poll the same bucket namespace. See
//! `timewheel-local` for the in-process, at-most-once counterpart.

pub mod memory_store;
pub mod store;
pub mod task;
mod wheel;

pub use memory_store::MemoryStore;
pub use store::{Arg, Reply, Script, Store, StoreConfig};
pub use task::Task;
pub use wheel::{DistributedWheel, FnHandler, Handler, HandlerError};
