//! The `persistence` module keeps queued messages on disk so that nothing
//! accepted for delivery is lost when the process restarts.
//!
//! It uses a newline-delimited JSON append log for cheap per-message writes
//! and a JSON snapshot that compaction rewrites from the in-memory queue.

pub mod queue_store;

pub use queue_store::{LogScan, QueueStore};
