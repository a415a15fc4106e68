//! Execution contexts the relay can deliver commands into.
//!
//! A host owns a set of contexts, knows which one is focused, and can install
//! an agent into a context on demand. Until an agent is installed, messages
//! sent to the context fail with [`HostError::NoReceiver`].

use std::fmt;

use async_trait::async_trait;
use aura_proto::{ContextMessage, ContextReply};
use thiserror::Error;

pub mod agent;
pub mod local;

pub use agent::AgentHandle;
pub use local::{LocalHost, SharedDocument, spawn_writeback};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("could not establish connection: receiving end does not exist")]
    NoReceiver,
    #[error("no execution context {0}")]
    UnknownTarget(TargetId),
    #[error("agent in {0} stopped before replying")]
    AgentGone(TargetId),
    #[error("{0} refused agent installation")]
    InstallRejected(TargetId),
}

#[async_trait]
pub trait ContextHost: Send + Sync + 'static {
    /// The focused context, if any.
    fn active_target(&self) -> Option<TargetId>;

    fn targets(&self) -> Vec<TargetId>;

    /// Delivers `message` to the agent in `target` and waits for its answer.
    /// `Ok(None)` means the agent handled the message without replying.
    async fn send(
        &self,
        target: TargetId,
        message: ContextMessage,
    ) -> Result<Option<ContextReply>, HostError>;

    /// Starts an agent in `target`. Installing over a live agent is a no-op.
    async fn install_agent(&self, target: TargetId) -> Result<(), HostError>;
}
