//! The `producer` module is the resilient publishing core.
//!
//! - `message`: the `QueuedMessage` carried to the broker
//! - `queue`: in-memory FIFO mirrored to the durable store
//! - `backoff`: capped doubling delay for reconnects
//! - `connection`: connection state machine, reconnection loop, flush loop
//! - `publisher`: the fire-and-forget `publish` entry point

pub mod backoff;
pub mod connection;
pub mod message;
pub mod publisher;
pub mod queue;

pub use backoff::Backoff;
pub use connection::{ConnectionManager, ConnectionState, FlushReport};
pub use message::QueuedMessage;
pub use publisher::{PublishOutcome, Publisher, PublisherOptions};
pub use queue::DeliveryQueue;
