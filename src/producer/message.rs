//! Message definitions for the producer
//!
//! `QueuedMessage` is what the producer hands to the broker and what the
//! durable queue writes to disk. The payload is kept as an opaque
//! `serde_json::Value` so the producer stays agnostic to what it carries.
//!
//! Equality is structural on topic + payload. `serde_json` object maps are
//! key-ordered, so two equal messages also serialize to identical bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: Value,
}

impl QueuedMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// The payload as it goes over the wire.
    pub fn serialized_payload(&self) -> String {
        self.payload.to_string()
    }
}
