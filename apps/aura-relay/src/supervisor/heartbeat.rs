use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aura_proto::{ContextMessage, ContextReply, RelayNotice};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, trace};

use crate::host::ContextHost;
use crate::transport::Outbound;

/// Stops the publisher when dropped.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Advisory liveness traffic while the channel is up: a timestamped
/// heartbeat frame to the client and a ping to every known context.
/// Failures are logged and otherwise ignored.
pub struct HeartbeatPublisher<H> {
    outbound: Outbound,
    host: Arc<H>,
    probe_timeout: Duration,
}

impl<H: ContextHost> HeartbeatPublisher<H> {
    pub fn new(outbound: Outbound, host: Arc<H>, probe_timeout: Duration) -> Self {
        Self {
            outbound,
            host,
            probe_timeout,
        }
    }

    /// First beat goes out one `interval` after the call.
    pub fn spawn(self, interval: Duration) -> HeartbeatHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.beat().await;
            }
        });
        HeartbeatHandle { task }
    }

    async fn beat(&self) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if let Err(err) = self.outbound.send_json(&RelayNotice::Heartbeat { ts }) {
            debug!(
                target = "aura_relay::heartbeat",
                error = %err,
                "heartbeat send failed"
            );
        }

        for target in self.host.targets() {
            match timeout(self.probe_timeout, self.host.send(target, ContextMessage::Ping)).await {
                Ok(Ok(Some(ContextReply::Pong(pong)))) if pong.pong => {
                    trace!(target = "aura_relay::heartbeat", context = %target, "context alive");
                }
                Ok(Ok(_)) => debug!(
                    target = "aura_relay::heartbeat",
                    context = %target,
                    "context answered ping without pong"
                ),
                Ok(Err(err)) => debug!(
                    target = "aura_relay::heartbeat",
                    context = %target,
                    error = %err,
                    "context probe failed"
                ),
                Err(_) => debug!(
                    target = "aura_relay::heartbeat",
                    context = %target,
                    "context probe timed out"
                ),
            }
        }
    }
}
