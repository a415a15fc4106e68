use std::env;
use std::time::Duration;

use crate::supervisor::connection::BackoffPolicy;
use crate::supervisor::delivery::DeliveryPolicy;
use crate::transport::websocket::DEFAULT_CONNECT_TIMEOUT;

/// Where the editing client listens. Not configurable.
pub const ENDPOINT: &str = "ws://127.0.0.1:8765";

pub const RELAXED_BACKOFF_ENV: &str = "AURA_RELAXED_BACKOFF";
pub const HEARTBEAT_SECS_ENV: &str = "AURA_HEARTBEAT_SECS";

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);

/// Timing knobs for the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub backoff: BackoffPolicy,
    /// How often a channel heartbeat and context probes go out while connected.
    pub heartbeat_interval: Duration,
    /// A handshake still pending after this long fails the attempt.
    pub connect_timeout: Duration,
    pub delivery: DeliveryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::standard(),
            heartbeat_interval: DEFAULT_HEARTBEAT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Defaults, adjusted by `AURA_RELAXED_BACKOFF` and `AURA_HEARTBEAT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if env_truthy(RELAXED_BACKOFF_ENV).unwrap_or(false) {
            config = config.relaxed();
        }
        if let Some(secs) = env::var(HEARTBEAT_SECS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        config
    }

    /// Grows the reconnect delay by 1.5x instead of doubling it.
    pub fn relaxed(mut self) -> Self {
        self.backoff = BackoffPolicy::relaxed();
        self
    }
}

pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}
