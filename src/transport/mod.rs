//! The `transport` module carries queued messages to a broker over
//! WebSockets.
//!
//! It defines the JSON frames spoken on the wire and a `BrokerClient`
//! implementation that dials the broker, optionally authenticates, and
//! writes `publish` frames.

pub mod message;
pub mod websocket;

pub use websocket::WsBrokerClient;
