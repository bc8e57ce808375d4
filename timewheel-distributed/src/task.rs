//! The distributed task record.
//!
//! Serialized as a single byte string whose internal structure is
//! transparent to the store. JSON is used here to match the source's
//! `encoding/json` choice exactly, and because a textual encoding keeps
//! the serialized form debuggable by hand (e.g. while inspecting a
//! sorted-set member with an ad-hoc store client).

use serde::{Deserialize, Serialize};
use timewheel_core::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub key: String,
    pub msg: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(rename = "executeAtUnix", default)]
    pub execute_at_unix: i64,
}

impl Task {
    /// `key` and `executeAtUnix` are filled in by
    /// [`DistributedWheel::add`](crate::wheel::DistributedWheel::add);
    /// callers only provide the application payload.
    pub fn new(msg: impl Into<String>, type_: impl Into<String>) -> Self {
        Self { key: String::new(), msg: msg.into(), type_: type_.into(), execute_at_unix: 0 }
    }

    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::DeserializationFailure(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|e| Error::DeserializationFailure(e.to_string()))
    }
}
