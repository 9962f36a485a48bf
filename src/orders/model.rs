//! Order Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle status, serialized with the wire names the consumers
/// already index on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    #[serde(rename = "pendente")]
    Pending,
    #[serde(rename = "processando")]
    Processing,
    #[serde(rename = "enviado")]
    Shipped,
    #[serde(rename = "entregue")]
    Delivered,
    #[serde(rename = "cancelado")]
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// New pending order with a random id.
    pub fn new(items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            items,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
