//! Duplex channel to the editing client.
//!
//! A [`Connector`] drives one connection attempt and reports what happens to
//! it as [`ChannelEvent`]s, tagged with the generation the supervisor assigned
//! to the attempt. The supervisor never touches a socket directly, so the
//! state machine can be driven by [`mock::MockConnector`] in tests.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("connection refused")]
    Refused,
    #[error("channel error: {0}")]
    Io(String),
    #[error("channel closed")]
    Closed,
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

#[derive(Debug)]
pub enum ChannelEvent {
    Opened { generation: u64, outbound: Outbound },
    Message { generation: u64, text: String },
    Closed { generation: u64, reason: Option<String> },
    Failed { generation: u64, error: TransportError },
}

impl ChannelEvent {
    pub fn generation(&self) -> u64 {
        match self {
            ChannelEvent::Opened { generation, .. }
            | ChannelEvent::Message { generation, .. }
            | ChannelEvent::Closed { generation, .. }
            | ChannelEvent::Failed { generation, .. } => *generation,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Write half of an open channel. Cloning is cheap; every clone feeds the
/// same socket, and sends fail once the socket is gone.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).map_err(|_| TransportError::Closed)
    }

    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(value).map_err(|err| TransportError::Encode(err.to_string()))?;
        self.send_text(text)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Drives one connection attempt to its end. Emits `Opened` once the
    /// channel is up, a `Message` per inbound text frame, then `Closed` or
    /// `Failed` when it goes away. Returns an error, without emitting
    /// anything, when the channel never opened.
    async fn connect(&self, generation: u64, events: EventSender) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_proto::RelayNotice;

    #[test]
    fn outbound_serializes_frames() {
        let (outbound, mut rx) = Outbound::channel();
        outbound
            .send_json(&RelayNotice::Heartbeat { ts: 42 })
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"heartbeat","ts":42}"#);
    }

    #[test]
    fn outbound_reports_a_dropped_socket() {
        let (outbound, rx) = Outbound::channel();
        assert!(!outbound.is_closed());
        drop(rx);
        assert!(outbound.is_closed());
        assert!(matches!(
            outbound.send_text("late".into()),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn events_carry_their_generation() {
        let (outbound, _rx) = Outbound::channel();
        assert_eq!(
            ChannelEvent::Opened {
                generation: 3,
                outbound
            }
            .generation(),
            3
        );
        assert_eq!(
            ChannelEvent::Failed {
                generation: 9,
                error: TransportError::Refused
            }
            .generation(),
            9
        );
    }
}
