//! Delivery queue
//!
//! In-memory FIFO of messages waiting for the broker, mirrored to the
//! `QueueStore`. The queue is the source of truth while the process lives;
//! the store is what survives a restart.
//!
//! Concurrency notes:
//! - the lock is a plain `std::sync::Mutex` and is never held across an
//!   `.await` or a disk write
//! - `drain` takes the whole content in one step, so a second concurrent
//!   drain sees an empty queue instead of the same messages

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::persistence::QueueStore;
use crate::producer::message::QueuedMessage;
use crate::utils::Result;

#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    messages: Arc<Mutex<VecDeque<QueuedMessage>>>,
    store: Arc<QueueStore>,
}

impl DeliveryQueue {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(VecDeque::new())),
            store,
        }
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        // every mutation is a single push/extend/take, a panicking holder
        // cannot leave the deque half-updated
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents, front first.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.lock().iter().cloned().collect()
    }

    /// Queue a message and write it to the log before returning.
    ///
    /// Callable from synchronous code. If the synchronous write fails, a
    /// second attempt is made on the runtime's blocking pool when a runtime
    /// is available. Returns the queue length after the push.
    pub fn enqueue(&self, msg: QueuedMessage) -> usize {
        let len = {
            let mut messages = self.lock();
            messages.push_back(msg.clone());
            messages.len()
        };

        if let Err(e) = self.store.append_sync(&msg) {
            warn!(topic = %msg.topic, "Failed to append queued message to log (sync): {e}");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let store = Arc::clone(&self.store);
                    handle.spawn(async move {
                        if let Err(e) = store.append(msg).await {
                            warn!("Failed to append queued message to log: {e}");
                        }
                    });
                }
                Err(_) => warn!("no runtime for fallback append, message is held in memory only"),
            }
        }

        len
    }

    /// Queue a message from async code; the log write runs on the blocking
    /// pool and is awaited.
    pub async fn enqueue_async(&self, msg: QueuedMessage) -> usize {
        let len = {
            let mut messages = self.lock();
            messages.push_back(msg.clone());
            messages.len()
        };

        let topic = msg.topic.clone();
        if let Err(e) = self.store.append(msg).await {
            warn!(%topic, "Failed to append queued message to log: {e}");
        }

        len
    }

    /// Take everything currently queued, leaving the queue empty.
    pub fn drain(&self) -> Vec<QueuedMessage> {
        std::mem::take(&mut *self.lock()).into()
    }

    /// Startup recovery: append the persisted messages to memory.
    /// Returns how many were restored.
    pub fn load_from_disk(&self) -> usize {
        let restored = self.store.load();
        let count = restored.len();
        self.lock().extend(restored);
        count
    }

    /// Rewrite the snapshot from the current contents and truncate the log.
    pub fn compact(&self) -> Result<usize> {
        self.store.compact_with(|| self.snapshot())
    }

    /// [`compact`](Self::compact) on the blocking pool.
    pub async fn compact_async(&self) -> Result<usize> {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || queue.compact()).await?
    }
}
