//! Scripted in-memory broker used by the producer tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::BrokerClient;
use crate::producer::message::QueuedMessage;
use crate::utils::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    Accept,
    Fail,
    /// Never completes; only a timeout gets the caller out.
    Hang,
}

#[derive(Debug)]
struct FakeState {
    reachable: bool,
    connect_script: VecDeque<bool>,
    send_script: VecDeque<SendBehavior>,
    connected: bool,
    delivered: Vec<QueuedMessage>,
    connect_attempts: Vec<Instant>,
    connect_delay: Duration,
    send_attempts: usize,
    disconnects: usize,
    fail_disconnect: bool,
}

#[derive(Debug)]
pub struct FakeBroker {
    state: Mutex<FakeState>,
}

impl FakeBroker {
    pub fn new(reachable: bool) -> Self {
        Self {
            state: Mutex::new(FakeState {
                reachable,
                connect_script: VecDeque::new(),
                send_script: VecDeque::new(),
                connected: false,
                delivered: Vec::new(),
                connect_attempts: Vec::new(),
                connect_delay: Duration::ZERO,
                send_attempts: 0,
                disconnects: 0,
                fail_disconnect: false,
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Outcomes for the next connect calls; afterwards `reachable` decides.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state.lock().unwrap().connect_script.extend(outcomes);
    }

    /// Outcomes for the next send calls; afterwards sends are accepted while
    /// reachable.
    pub fn script_sends(&self, outcomes: impl IntoIterator<Item = SendBehavior>) {
        self.state.lock().unwrap().send_script.extend(outcomes);
    }

    /// Every connect call sleeps this long before deciding its outcome.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn fail_disconnect(&self) {
        self.state.lock().unwrap().fail_disconnect = true;
    }

    pub fn delivered(&self) -> Vec<QueuedMessage> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state.lock().unwrap().connect_attempts.clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.state.lock().unwrap().send_attempts
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.connect_attempts.push(Instant::now());
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        let ok = state.connect_script.pop_front().unwrap_or(state.reachable);
        state.connected = ok;
        if ok {
            Ok(())
        } else {
            Err(BrokerError::Transport("connection refused".to_string()))
        }
    }

    async fn send(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let behavior = {
            let mut state = self.state.lock().unwrap();
            state.send_attempts += 1;
            let default = if state.reachable && state.connected {
                SendBehavior::Accept
            } else {
                SendBehavior::Fail
            };
            let behavior = state.send_script.pop_front().unwrap_or(default);
            if behavior == SendBehavior::Accept {
                let payload = serde_json::from_str(payload)?;
                state.delivered.push(QueuedMessage::new(topic, payload));
            }
            behavior
        };

        match behavior {
            SendBehavior::Accept => Ok(()),
            SendBehavior::Fail => Err(BrokerError::Rejected(format!("send to {topic} failed"))),
            SendBehavior::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.connected = false;
        if state.fail_disconnect {
            Err(BrokerError::Transport("socket already closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn endpoint(&self) -> String {
        "fake://broker".to_string()
    }
}
