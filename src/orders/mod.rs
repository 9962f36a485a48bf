//! The `orders` module turns order changes into broker events.
//!
//! - `model`: `Order`, `OrderItem` and `OrderStatus` as they appear on the wire
//! - `events`: topic names and the fire-and-forget `OrderEvents` emitter

pub mod events;
pub mod model;

pub use events::{ORDER_CREATED, ORDER_STATUS_UPDATED, OrderEvents};
pub use model::{Order, OrderItem, OrderStatus};
