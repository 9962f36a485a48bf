//! Publisher
//!
//! Entry point for everything that wants a message on the broker. A call to
//! [`Publisher::publish`] either gets the message sent or gets it durably
//! queued; it never returns an error and never waits on the network.
//!
//! - disconnected: the message is queued and written to the log before
//!   `publish` returns, then a reconnection is requested
//! - connected: a tracked task sends it with a timeout; on failure the
//!   message is queued, the connection is marked down and a reconnection is
//!   requested
//!
//! `on_stop` waits for in-flight sends before closing the connection, so a
//! message handed to `publish` ends up either delivered or in the queue.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::BrokerClient;
use crate::config::{BrokerSettings, Settings};
use crate::persistence::QueueStore;
use crate::producer::backoff::Backoff;
use crate::producer::connection::{ConnectionManager, ConnectionState};
use crate::producer::message::QueuedMessage;
use crate::producer::queue::DeliveryQueue;

/// What happened to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Queued,
}

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub send_timeout: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(5000),
            reconnect_floor: Duration::from_millis(1000),
            reconnect_ceiling: Duration::from_millis(30000),
        }
    }
}

impl From<&BrokerSettings> for PublisherOptions {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            send_timeout: Duration::from_millis(settings.send_timeout_ms),
            reconnect_floor: Duration::from_millis(settings.reconnect_floor_ms),
            reconnect_ceiling: Duration::from_millis(settings.reconnect_ceiling_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Publisher {
    connection: Arc<ConnectionManager>,
    queue: DeliveryQueue,
    in_flight: TaskTracker,
}

impl Publisher {
    pub fn new(client: Arc<dyn BrokerClient>, store: QueueStore, options: PublisherOptions) -> Self {
        let queue = DeliveryQueue::new(Arc::new(store));
        let backoff = Backoff::new(options.reconnect_floor, options.reconnect_ceiling);
        let connection = Arc::new(ConnectionManager::new(
            client,
            queue.clone(),
            backoff,
            options.send_timeout,
        ));
        Self {
            connection,
            queue,
            in_flight: TaskTracker::new(),
        }
    }

    pub fn from_settings(client: Arc<dyn BrokerClient>, settings: &Settings) -> Self {
        Self::new(
            client,
            QueueStore::from_settings(&settings.storage),
            PublisherOptions::from(&settings.broker),
        )
    }

    /// Prepare storage, restore the persisted queue and start connecting.
    /// Failures are logged; the publisher then runs with an in-memory queue.
    pub async fn on_start(&self) {
        let store = Arc::clone(self.queue.store());
        match tokio::task::spawn_blocking(move || store.ensure()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not ensure queue storage: {e}"),
            Err(e) => warn!("Could not ensure queue storage: {e}"),
        }

        let queue = self.queue.clone();
        match tokio::task::spawn_blocking(move || queue.load_from_disk()).await {
            Ok(restored) if restored > 0 => info!(restored, "restored persisted broker queue"),
            Ok(_) => {}
            Err(e) => warn!("Failed to load persisted broker queue: {e}"),
        }

        self.connection.trigger_reconnect();
    }

    /// Let in-flight sends finish (each is bounded by the send timeout and
    /// requeues on failure), then stop reconnecting and close the broker
    /// connection. Never fails.
    pub async fn on_stop(&self) {
        self.in_flight.close();
        // each send is bounded by the send timeout; the margin covers the
        // requeue write that follows a failed one
        let limit = self.connection.send_timeout() * 2;
        if tokio::time::timeout(limit, self.in_flight.wait()).await.is_err() {
            warn!(
                in_flight = self.in_flight.len(),
                "In-flight broker sends did not settle before shutdown"
            );
        }
        self.connection.shutdown().await;
    }

    /// Fire-and-forget publish.
    ///
    /// When disconnected the message is on disk by the time this returns.
    /// When connected the send runs in a tracked task that `on_stop` waits
    /// for. Must be called from within a tokio runtime for the connected
    /// path; without one the message is queued instead.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) {
        let msg = QueuedMessage::new(topic, payload);
        debug!(topic = %msg.topic, connected = self.connection.is_connected(), "publish called");

        if !self.connection.is_connected() {
            self.queue_and_reconnect(msg);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                self.in_flight.spawn_on(
                    async move {
                        this.send_or_queue(msg).await;
                    },
                    &handle,
                );
            }
            Err(_) => self.queue_and_reconnect(msg),
        }
    }

    /// Like [`publish`](Self::publish) but waits for the outcome.
    pub async fn publish_and_wait(&self, topic: impl Into<String>, payload: Value) -> PublishOutcome {
        let msg = QueuedMessage::new(topic, payload);
        if !self.connection.is_connected() {
            self.queue_and_reconnect(msg);
            return PublishOutcome::Queued;
        }
        self.send_or_queue(msg).await
    }

    fn queue_and_reconnect(&self, msg: QueuedMessage) {
        warn!(topic = %msg.topic, "Broker producer not connected, queueing message");
        self.queue.enqueue(msg);
        self.connection.trigger_reconnect();
    }

    async fn send_or_queue(&self, msg: QueuedMessage) -> PublishOutcome {
        match self.connection.send_with_timeout(&msg).await {
            Ok(()) => PublishOutcome::Sent,
            Err(e) => {
                error!(topic = %msg.topic, "Error sending message to broker: {e}");
                let topic = msg.topic.clone();
                let queued = self.queue.enqueue_async(msg).await;
                info!(%topic, queued, "Queued message in memory");
                self.connection.mark_disconnected();
                self.connection.trigger_reconnect();
                PublishOutcome::Queued
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Sends started by [`publish`](Self::publish) that have not settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.queue.snapshot()
    }

    /// Poll until the queue is empty, no send is in flight, the connection is
    /// up and no flush is running, or until `limit` elapses. Returns whether
    /// everything drained.
    pub async fn wait_until_drained(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.queue.is_empty()
                && self.in_flight.is_empty()
                && self.connection.is_connected()
                && !self.connection.is_reconnecting()
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
