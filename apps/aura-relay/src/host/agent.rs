use aura_proto::{ContextMessage, ContextReply};
use aura_surface::apply_replace;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::local::SharedDocument;
use super::{HostError, TargetId};
use crate::supervisor::SupervisorHandle;

struct Envelope {
    message: ContextMessage,
    reply: oneshot::Sender<Option<ContextReply>>,
}

/// Cloneable address of a running agent.
#[derive(Debug, Clone)]
pub struct AgentSender {
    target: TargetId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl AgentSender {
    pub async fn call(&self, message: ContextMessage) -> Result<Option<ContextReply>, HostError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(Envelope { message, reply })
            .map_err(|_| HostError::NoReceiver)?;
        answer.await.map_err(|_| HostError::AgentGone(self.target))
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("message", &self.message.kind())
            .finish()
    }
}

/// The engine's presence inside one context. Messages are handled one at a
/// time, in arrival order. Dropping the handle stops the agent.
#[derive(Debug)]
pub struct AgentHandle {
    sender: AgentSender,
    task: JoinHandle<()>,
}

impl AgentHandle {
    pub fn spawn(target: TargetId, document: SharedDocument, supervisor: SupervisorHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(target, document, supervisor, rx));
        Self {
            sender: AgentSender { target, tx },
            task,
        }
    }

    pub fn sender(&self) -> AgentSender {
        self.sender.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished() && !self.sender.tx.is_closed()
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    target: TargetId,
    document: SharedDocument,
    supervisor: SupervisorHandle,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(Envelope { message, reply }) = rx.recv().await {
        let kind = message.kind();
        let answer = handle(target, &document, message);
        let replied = answer.is_some();
        if reply.send(answer).is_err() {
            debug!(
                target = "aura_relay::agent",
                context = %target,
                kind,
                "caller went away before the reply"
            );
        }
        if replied && kind == "replace-range" {
            supervisor.keep_alive(target);
        }
    }
}

fn handle(
    target: TargetId,
    document: &SharedDocument,
    message: ContextMessage,
) -> Option<ContextReply> {
    match message {
        ContextMessage::Ping => Some(ContextReply::pong()),
        ContextMessage::ExtensionReady => {
            debug!(target = "aura_relay::agent", context = %target, "relay connected");
            None
        }
        ContextMessage::ReplaceRange(command) => {
            let result = {
                let mut document = document.lock();
                apply_replace(&mut document, &command)
            };
            Some(ContextReply::Replaced(result))
        }
    }
}
