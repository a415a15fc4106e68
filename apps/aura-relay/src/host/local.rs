use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use aura_proto::{ConnectionStatus, ContextMessage, ContextReply, ContextRequest};
use aura_surface::{Document, EventKind, NodeId};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::agent::AgentHandle;
use super::{ContextHost, HostError, TargetId};
use crate::supervisor::SupervisorHandle;

pub type SharedDocument = Arc<Mutex<Document>>;

struct Context {
    document: SharedDocument,
    agent: Option<AgentHandle>,
}

#[derive(Default)]
struct HostState {
    contexts: BTreeMap<TargetId, Context>,
    focused: Option<TargetId>,
    next_id: u32,
    block_installs: bool,
}

/// Contexts living in this process, one [`Document`] each.
pub struct LocalHost {
    state: Mutex<HostState>,
    supervisor: SupervisorHandle,
}

impl LocalHost {
    pub fn new(supervisor: SupervisorHandle) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            supervisor,
        }
    }

    /// Adds a context without an agent. The first context opened gets focus.
    pub fn open(&self, document: Document) -> (TargetId, SharedDocument) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let target = TargetId(state.next_id);
        let document = Arc::new(Mutex::new(document));
        state.contexts.insert(
            target,
            Context {
                document: document.clone(),
                agent: None,
            },
        );
        if state.focused.is_none() {
            state.focused = Some(target);
        }
        (target, document)
    }

    pub fn focus(&self, target: TargetId) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if !state.contexts.contains_key(&target) {
            return Err(HostError::UnknownTarget(target));
        }
        state.focused = Some(target);
        Ok(())
    }

    pub fn blur(&self) {
        self.state.lock().focused = None;
    }

    /// Removes a context and stops its agent.
    pub fn close(&self, target: TargetId) -> Option<SharedDocument> {
        let mut state = self.state.lock();
        let context = state.contexts.remove(&target)?;
        if state.focused == Some(target) {
            state.focused = None;
        }
        Some(context.document)
    }

    pub fn document(&self, target: TargetId) -> Option<SharedDocument> {
        self.state
            .lock()
            .contexts
            .get(&target)
            .map(|context| context.document.clone())
    }

    pub fn has_agent(&self, target: TargetId) -> bool {
        self.state
            .lock()
            .contexts
            .get(&target)
            .and_then(|context| context.agent.as_ref())
            .is_some_and(AgentHandle::is_running)
    }

    /// Makes every later installation fail, as a page that forbids script
    /// injection would.
    pub fn block_installs(&self, blocked: bool) {
        self.state.lock().block_installs = blocked;
    }

    /// Forwards a context's request to the supervisor. Only
    /// `check-connection` has an answer.
    pub async fn request(
        &self,
        target: TargetId,
        request: ContextRequest,
    ) -> Option<ConnectionStatus> {
        self.supervisor.request(target, request).await
    }
}

#[async_trait]
impl ContextHost for LocalHost {
    fn active_target(&self) -> Option<TargetId> {
        let state = self.state.lock();
        state
            .focused
            .filter(|target| state.contexts.contains_key(target))
    }

    fn targets(&self) -> Vec<TargetId> {
        self.state.lock().contexts.keys().copied().collect()
    }

    async fn send(
        &self,
        target: TargetId,
        message: ContextMessage,
    ) -> Result<Option<ContextReply>, HostError> {
        let agent = {
            let state = self.state.lock();
            let context = state
                .contexts
                .get(&target)
                .ok_or(HostError::UnknownTarget(target))?;
            context
                .agent
                .as_ref()
                .filter(|agent| agent.is_running())
                .map(AgentHandle::sender)
                .ok_or(HostError::NoReceiver)?
        };
        agent.call(message).await
    }

    async fn install_agent(&self, target: TargetId) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.block_installs {
            return Err(HostError::InstallRejected(target));
        }
        let context = state
            .contexts
            .get_mut(&target)
            .ok_or(HostError::UnknownTarget(target))?;
        if context.agent.as_ref().is_some_and(AgentHandle::is_running) {
            return Ok(());
        }
        context.agent = Some(AgentHandle::spawn(
            target,
            context.document.clone(),
            self.supervisor.clone(),
        ));
        debug!(target = "aura_relay::host", context = %target, "agent installed");
        Ok(())
    }
}

/// Persists a text control's value to `path` after every change notification
/// it fires.
pub fn spawn_writeback(path: PathBuf, document: SharedDocument, field: NodeId) -> JoinHandle<()> {
    let mut events = document.lock().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.target == field && event.kind == EventKind::Change => {
                    let value = document
                        .lock()
                        .control(field)
                        .map(|control| control.value().to_string());
                    let Some(value) = value else {
                        warn!(
                            target = "aura_relay::writeback",
                            path = %path.display(),
                            "field is gone"
                        );
                        break;
                    };
                    match tokio::fs::write(&path, value).await {
                        Ok(()) => info!(
                            target = "aura_relay::writeback",
                            path = %path.display(),
                            "saved"
                        ),
                        Err(err) => warn!(
                            target = "aura_relay::writeback",
                            path = %path.display(),
                            error = %err,
                            "failed to save"
                        ),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(
                    target = "aura_relay::writeback",
                    skipped,
                    "missed surface events"
                ),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
