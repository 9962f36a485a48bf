//! Broker connection manager
//!
//! Owns the single logical connection to the broker and the loop that
//! re-establishes it. Responsibilities:
//! - track `Disconnected -> Connecting -> Connected` and back
//! - run at most one reconnection loop at a time, however many callers ask
//! - back off exponentially between failed attempts, forever
//! - drain the delivery queue (the flush loop) every time it connects
//!
//! The reconnection loop is a plain `loop` inside one spawned task. A
//! trigger that arrives while the loop is finishing is picked up by the
//! re-check after the `reconnecting` flag is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::BrokerClient;
use crate::producer::backoff::Backoff;
use crate::producer::message::QueuedMessage;
use crate::producer::queue::DeliveryQueue;
use crate::utils::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Result of one pass of the flush loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub requeued: usize,
}

pub struct ConnectionManager {
    client: Arc<dyn BrokerClient>,
    queue: DeliveryQueue,
    state: Mutex<ConnectionState>,
    reconnecting: AtomicBool,
    backoff: Mutex<Backoff>,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        queue: DeliveryQueue,
        backoff: Backoff,
        send_timeout: Duration,
    ) -> Self {
        Self {
            client,
            queue,
            state: Mutex::new(ConnectionState::Disconnected),
            reconnecting: AtomicBool::new(false),
            backoff: Mutex::new(backoff),
            send_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    fn state_lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backoff_lock(&self) -> MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state_lock() = next;
    }

    pub fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Delay the reconnection loop would wait after its next failure.
    pub fn next_reconnect_delay(&self) -> Duration {
        self.backoff_lock().peek()
    }

    /// Start the reconnection loop unless one is already running.
    ///
    /// Returns `true` if this call started it. No-op after shutdown or when
    /// called outside a tokio runtime.
    pub fn trigger_reconnect(self: &Arc<Self>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("reconnection already in progress");
            return false;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Arc::clone(self).reconnect_loop());
                true
            }
            Err(_) => {
                self.reconnecting.store(false, Ordering::SeqCst);
                warn!("no tokio runtime available, reconnection not started");
                false
            }
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            self.run_until_connected().await;
            self.reconnecting.store(false, Ordering::SeqCst);

            // a sender may have marked us down after the last flush while
            // its own trigger was swallowed by the flag we just released
            if self.shutdown.is_cancelled() || self.is_connected() {
                break;
            }
            if self.reconnecting.swap(true, Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn run_until_connected(&self) {
        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            info!(endpoint = %self.client.endpoint(), "Attempting to connect to broker");

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.mark_disconnected();
                    return;
                }
                attempt = self.client.connect() => attempt,
            };

            match attempt {
                Ok(()) => {
                    if !self.promote_to_connected() {
                        info!("Shutdown started while connecting, closing new broker connection");
                        if let Err(e) = self.client.disconnect().await {
                            warn!("Error while disconnecting producer: {e}");
                        }
                        return;
                    }
                    self.backoff_lock().reset();
                    info!(endpoint = %self.client.endpoint(), "Connected to broker");

                    let report = self.flush().await;
                    if report.requeued == 0 {
                        return;
                    }
                    warn!(
                        requeued = report.requeued,
                        "flush left messages queued, treating connection as down"
                    );
                    self.mark_disconnected();
                }
                Err(e) => {
                    self.mark_disconnected();
                    warn!("Failed to connect to broker (will retry): {e}");
                }
            }

            let delay = self.backoff_lock().next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "waiting before next connection attempt");
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Flip to `Connected` unless shutdown has begun. The check and the
    /// write share the state lock with `shutdown`, so either this sees the
    /// cancellation or `shutdown` sees `Connected` and closes the link.
    fn promote_to_connected(&self) -> bool {
        let mut state = self.state_lock();
        if self.shutdown.is_cancelled() {
            *state = ConnectionState::Disconnected;
            return false;
        }
        *state = ConnectionState::Connected;
        true
    }

    /// One bounded send attempt. A send that outlives the timeout counts as
    /// failed; whatever it does afterwards is ignored.
    pub async fn send_with_timeout(&self, msg: &QueuedMessage) -> Result<(), BrokerError> {
        let payload = msg.serialized_payload();
        match tokio::time::timeout(self.send_timeout, self.client.send(&msg.topic, &payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.send_timeout)),
        }
    }

    /// The flush loop: take everything queued, send it in order, put failed
    /// messages back at the tail, then compact the store.
    pub async fn flush(&self) -> FlushReport {
        let batch = self.queue.drain();
        let mut report = FlushReport::default();

        if !batch.is_empty() {
            info!("Flushing {} queued broker messages", batch.len());
        }

        for msg in batch {
            match self.send_with_timeout(&msg).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    error!(topic = %msg.topic, "Failed to send queued message: {e}");
                    self.queue.enqueue_async(msg).await;
                    report.requeued += 1;
                }
            }
        }

        if let Err(e) = self.queue.compact_async().await {
            warn!("Failed to compact queue log: {e}");
        }

        report
    }

    /// Stop reconnecting and close the connection if it is up. Never fails.
    pub async fn shutdown(&self) {
        // cancel before taking the state lock; see `promote_to_connected`
        self.shutdown.cancel();

        let was_connected = {
            let mut state = self.state_lock();
            let connected = *state == ConnectionState::Connected;
            *state = ConnectionState::Disconnected;
            connected
        };

        if was_connected {
            if let Err(e) = self.client.disconnect().await {
                warn!("Error while disconnecting producer: {e}");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.client.endpoint())
            .field("state", &self.state())
            .field("reconnecting", &self.is_reconnecting())
            .finish()
    }
}
