//! Connection lifecycle and reconnect backoff.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`, forever. Every
//! connection attempt gets a fresh generation number; events from an older
//! generation are ignored, so a late close from a previous socket can never
//! tear down the current one.

use std::time::Duration;

use aura_proto::ConnectionStatus;
use tokio::time::Instant;

use super::heartbeat::HeartbeatHandle;
use crate::transport::Outbound;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const fn standard() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(8),
        }
    }

    pub const fn relaxed() -> Self {
        Self {
            factor: 1.5,
            ..Self::standard()
        }
    }

    fn grow(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor.max(1.0)).min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Reconnect delay that grows per failed attempt and snaps back to the base
/// once a connection succeeds.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.base.min(policy.cap),
            policy,
        }
    }

    /// Delay to wait now. The following call returns a longer one, up to the
    /// cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.policy.grow(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.policy.base.min(self.policy.cap);
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

#[derive(Debug)]
pub enum LinkState {
    Disconnected {
        retry_at: Option<Instant>,
    },
    Connecting {
        generation: u64,
    },
    Connected {
        generation: u64,
        outbound: Outbound,
        heartbeat: Option<HeartbeatHandle>,
    },
}

/// The one piece of mutable connection state. Owned by the supervisor loop.
#[derive(Debug)]
pub struct Connection {
    state: LinkState,
    backoff: Backoff,
    generations: u64,
}

impl Connection {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: LinkState::Disconnected { retry_at: None },
            backoff: Backoff::new(policy),
            generations: 0,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.is_connected(),
            backoff: u64::try_from(self.backoff.current().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The write half of the current channel, while connected.
    pub fn outbound(&self) -> Option<&Outbound> {
        match &self.state {
            LinkState::Connected { outbound, .. } => Some(outbound),
            _ => None,
        }
    }

    pub fn connected_generation(&self) -> Option<u64> {
        match self.state {
            LinkState::Connected { generation, .. } => Some(generation),
            _ => None,
        }
    }

    pub fn retry_at(&self) -> Option<Instant> {
        match self.state {
            LinkState::Disconnected { retry_at } => retry_at,
            _ => None,
        }
    }

    /// Starts a new attempt. Returns its generation, or `None` when an attempt
    /// is already under way or the channel is up.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if !matches!(self.state, LinkState::Disconnected { .. }) {
            return None;
        }
        self.generations += 1;
        self.state = LinkState::Connecting {
            generation: self.generations,
        };
        Some(self.generations)
    }

    /// Records that attempt `generation` opened. Returns false for stale
    /// generations, whose channel the caller should drop.
    pub fn opened(&mut self, generation: u64, outbound: Outbound) -> bool {
        if !matches!(self.state, LinkState::Connecting { generation: current } if current == generation)
        {
            return false;
        }
        self.backoff.reset();
        self.state = LinkState::Connected {
            generation,
            outbound,
            heartbeat: None,
        };
        true
    }

    pub fn attach_heartbeat(&mut self, handle: HeartbeatHandle) {
        if let LinkState::Connected { heartbeat, .. } = &mut self.state {
            *heartbeat = Some(handle);
        }
    }

    /// Records that attempt `generation` failed or its channel went away.
    /// Schedules the next attempt and returns the delay before it, or `None`
    /// for stale generations.
    pub fn lost(&mut self, generation: u64, now: Instant) -> Option<Duration> {
        let current = match self.state {
            LinkState::Connecting { generation } | LinkState::Connected { generation, .. } => {
                generation
            }
            LinkState::Disconnected { .. } => return None,
        };
        if current != generation {
            return None;
        }
        let delay = self.backoff.next_delay();
        // Dropping the old state stops its heartbeat.
        self.state = LinkState::Disconnected {
            retry_at: Some(now + delay),
        };
        Some(delay)
    }

    /// Leaves whatever state the link is in without scheduling a retry.
    pub fn close(&mut self) {
        self.state = LinkState::Disconnected { retry_at: None };
    }
}
