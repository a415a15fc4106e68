//! Scripted in-memory connector for driving the supervisor in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use aura_proto::ReplaceResult;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ChannelEvent, Connector, EventSender, Outbound, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAttempt {
    Refuse,
    Accept,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockAttempt>,
    attempts: Vec<Instant>,
}

/// Accepts every attempt unless told otherwise. Each accepted attempt hands
/// a [`MockPeer`] to the test through the receiver returned by [`new`].
///
/// [`new`]: MockConnector::new
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(MockState::default())),
                peers,
            },
            rx,
        )
    }

    /// Queues outcomes for the next attempts, in order.
    pub fn script(&self, attempts: impl IntoIterator<Item = MockAttempt>) {
        self.state.lock().script.extend(attempts);
    }

    pub fn refuse_next(&self, count: usize) {
        self.script(std::iter::repeat(MockAttempt::Refuse).take(count));
    }

    /// When each attempt started, in order.
    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, generation: u64, events: EventSender) -> Result<(), TransportError> {
        let outcome = {
            let mut state = self.state.lock();
            state.attempts.push(Instant::now());
            state.script.pop_front().unwrap_or(MockAttempt::Accept)
        };
        if outcome == MockAttempt::Refuse {
            return Err(TransportError::Refused);
        }

        let (outbound, from_relay) = Outbound::channel();
        let (to_relay, mut inbound) = mpsc::unbounded_channel();
        if events
            .send(ChannelEvent::Opened {
                generation,
                outbound,
            })
            .is_err()
        {
            return Ok(());
        }
        let _ = self.peers.send(MockPeer {
            to_relay: Some(to_relay),
            from_relay,
        });

        while let Some(text) = inbound.recv().await {
            if events
                .send(ChannelEvent::Message { generation, text })
                .is_err()
            {
                return Ok(());
            }
        }
        let _ = events.send(ChannelEvent::Closed {
            generation,
            reason: Some("peer closed".into()),
        });
        Ok(())
    }
}

/// The client end of an accepted mock channel. Dropping it closes the
/// channel.
pub struct MockPeer {
    to_relay: Option<mpsc::UnboundedSender<String>>,
    from_relay: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    pub fn send(&self, text: impl Into<String>) {
        if let Some(to_relay) = &self.to_relay {
            let _ = to_relay.send(text.into());
        }
    }

    pub fn send_json(&self, value: &Value) {
        self.send(value.to_string());
    }

    /// Next raw frame from the relay, heartbeats included.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_relay.recv().await
    }

    /// Next frame that is not a heartbeat, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let frame = self.from_relay.recv().await?;
            let Ok(value) = serde_json::from_str::<Value>(&frame) else {
                continue;
            };
            if value.get("type").and_then(Value::as_str) == Some("heartbeat") {
                continue;
            }
            return Some(value);
        }
    }

    pub async fn recv_reply(&mut self) -> Option<ReplaceResult> {
        let value = self.recv_json().await?;
        serde_json::from_value(value).ok()
    }

    /// Closes the relay's side of the channel but keeps listening, so a test
    /// can check that nothing else arrives.
    pub fn hang_up(&mut self) {
        self.to_relay = None;
    }

    pub fn close(self) {}
}
