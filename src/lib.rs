//! # orderpub
//!
//! `orderpub` publishes order events to a message broker without ever making
//! the caller wait on, or fail because of, the broker. Messages that cannot
//! be sent right away are queued in memory, mirrored to disk, and delivered
//! in order once a background loop re-establishes the connection.
//!
//! ## Core Modules
//!
//! - `producer`: the publisher, connection manager, delivery queue and backoff.
//! - `persistence`: the on-disk snapshot + append log behind the queue.
//! - `client`: the `BrokerClient` seam the producer talks through.
//! - `transport`: a WebSocket implementation of `BrokerClient`.
//! - `orders`: order types and the `order_created` / `order_status_updated` events.
//! - `config`: layered settings from file and environment.
//! - `utils`: error types and logging setup.

pub mod client;
pub mod config;
pub mod orders;
pub mod persistence;
pub mod producer;
pub mod transport;
pub mod utils;
