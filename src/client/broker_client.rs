//! Outbound broker capability
//!
//! `BrokerClient` is the narrow seam between the producer and whatever
//! carries messages to the broker. The producer only ever connects, sends a
//! `(topic, serialized payload)` pair, and disconnects; it makes no
//! assumption about the protocol underneath.

use async_trait::async_trait;

use crate::utils::BrokerError;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish the connection. Called again after any failure.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Deliver one message. `Ok` means the broker side accepted it.
    async fn send(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Human readable endpoint, used in log lines.
    fn endpoint(&self) -> String;
}
