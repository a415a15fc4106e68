use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{ChannelEvent, Connector, EventSender, Outbound, TransportError};

/// Longest a handshake may take before the attempt counts as failed.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Plain websocket client to the editing client.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect_error(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Connect {
            url: self.url.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, generation: u64, events: EventSender) -> Result<(), TransportError> {
        let (stream, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                self.connect_error(format!(
                    "handshake timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|err| self.connect_error(err.to_string()))?;
        debug!(
            target = "aura_relay::transport::websocket",
            url = %self.url,
            generation,
            "websocket open"
        );

        let (outbound, rx_out) = Outbound::channel();
        if events
            .send(ChannelEvent::Opened {
                generation,
                outbound,
            })
            .is_err()
        {
            return Ok(());
        }

        let ending = pump(stream, rx_out, generation, &events).await;
        let _ = events.send(ending);
        Ok(())
    }
}

/// Shuttles frames until either side goes away and returns the event that
/// describes how the channel ended.
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    generation: u64,
    events: &EventSender,
) -> ChannelEvent {
    let (mut ws_sender, mut ws_receiver) = stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx_out.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let ending = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if events
                    .send(ChannelEvent::Message { generation, text })
                    .is_err()
                {
                    break ChannelEvent::Closed {
                        generation,
                        reason: Some("supervisor gone".into()),
                    };
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break ChannelEvent::Closed {
                    generation,
                    reason: frame.map(|frame| frame.reason.to_string()),
                };
            }
            Some(Ok(other)) => {
                trace!(
                    target = "aura_relay::transport::websocket",
                    generation,
                    kind = ?other,
                    "ignoring non-text frame"
                );
            }
            Some(Err(err)) => {
                break ChannelEvent::Failed {
                    generation,
                    error: TransportError::Io(err.to_string()),
                };
            }
            None => break ChannelEvent::Closed {
                generation,
                reason: None,
            },
        }
    };

    send_task.abort();
    let _ = send_task.await;
    ending
}
