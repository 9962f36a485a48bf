//! The `client` module defines how the producer talks to a broker.
//!
//! It provides the `BrokerClient` trait; the WebSocket implementation lives
//! in `transport`.

pub mod broker_client;
pub use broker_client::BrokerClient;

#[cfg(test)]
pub mod fake;
