//! Order events
//!
//! Thin layer between order handling and the publisher. Both events are
//! fire-and-forget: once the payload is built, delivery is the publisher's
//! problem and nothing is reported back.

use serde::Serialize;
use tracing::error;

use crate::orders::model::{Order, OrderStatus};
use crate::producer::Publisher;
use crate::utils::Result;

pub const ORDER_CREATED: &str = "order_created";
pub const ORDER_STATUS_UPDATED: &str = "order_status_updated";

#[derive(Debug, Serialize)]
struct StatusUpdate<'a> {
    id: &'a str,
    status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct OrderEvents {
    publisher: Publisher,
}

impl OrderEvents {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    /// Publish the whole order on `order_created`.
    pub fn order_created(&self, order: &Order) {
        if let Err(e) = self.publish_serialized(ORDER_CREATED, order) {
            error!(order_id = %order.id, "Failed to serialize order_created event: {e}");
        }
    }

    /// Publish `{id, status}` on `order_status_updated`.
    pub fn status_updated(&self, id: &str, status: OrderStatus) {
        if let Err(e) = self.publish_serialized(ORDER_STATUS_UPDATED, &StatusUpdate { id, status }) {
            error!(order_id = %id, "Failed to serialize order_status_updated event: {e}");
        }
    }

    /// Serialize `value` and hand it to the publisher. Only a serialization
    /// failure is returned; delivery problems are never surfaced.
    pub fn publish_serialized<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_value(value)?;
        self.publisher.publish(topic, payload);
        Ok(())
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }
}
