//! Getting a command to the engine in the focused context.
//!
//! Before delivery the target must have a responsive agent. Ensure-present
//! probes with a short timeout and, on failure, installs the agent and backs
//! off `base * 2^attempt` before probing again. After `max_probes` failed
//! probes the command fails with `inject-failed`.

use std::sync::Arc;
use std::time::Duration;

use aura_proto::{Command, ContextMessage, ContextReply, ErrorKind, ReplaceResult, RequestId};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::host::{ContextHost, HostError, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// How long a liveness probe may take.
    pub probe_timeout: Duration,
    /// Wait after the first installation; doubles per attempt.
    pub inject_base_delay: Duration,
    pub max_probes: u32,
    /// How long the engine gets to answer a delivered command.
    pub reply_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            inject_base_delay: Duration::from_millis(50),
            max_probes: 3,
            reply_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no focused context")]
    NoTarget,
    #[error("agent did not answer after {attempts} probes")]
    InjectFailed { attempts: u32 },
    #[error("{0}")]
    Send(HostError),
    #[error("agent returned no result")]
    NoResponse,
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::NoTarget => ErrorKind::NoTab,
            DeliveryError::InjectFailed { .. } => ErrorKind::InjectFailed,
            DeliveryError::Send(_) => ErrorKind::SendFailed,
            DeliveryError::NoResponse => ErrorKind::NoResponse,
        }
    }

    pub fn into_result(self, request_id: RequestId) -> ReplaceResult {
        let result = ReplaceResult::failed(request_id, self.kind());
        match self {
            DeliveryError::Send(err) => result.with_details(err.to_string()),
            _ => result,
        }
    }
}

pub struct Delivery<H> {
    host: Arc<H>,
    policy: DeliveryPolicy,
}

impl<H: ContextHost> Delivery<H> {
    pub fn new(host: Arc<H>, policy: DeliveryPolicy) -> Self {
        Self { host, policy }
    }

    /// Always produces exactly one result for `command`.
    pub async fn deliver(&self, command: Command) -> ReplaceResult {
        let request_id = command.request_id.clone();
        match self.try_deliver(command).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    target = "aura_relay::delivery",
                    request_id = %request_id,
                    error = %err,
                    "delivery failed"
                );
                err.into_result(request_id)
            }
        }
    }

    async fn try_deliver(&self, command: Command) -> Result<ReplaceResult, DeliveryError> {
        let target = self.host.active_target().ok_or(DeliveryError::NoTarget)?;
        self.ensure_present(target).await?;

        let reply = timeout(
            self.policy.reply_timeout,
            self.host.send(target, ContextMessage::ReplaceRange(command)),
        )
        .await
        .map_err(|_| DeliveryError::NoResponse)?
        .map_err(DeliveryError::Send)?;

        match reply {
            Some(ContextReply::Replaced(result)) => Ok(result),
            Some(ContextReply::Pong(_)) | None => Err(DeliveryError::NoResponse),
        }
    }

    pub async fn ensure_present(&self, target: TargetId) -> Result<(), DeliveryError> {
        let attempts = self.policy.max_probes.max(1);
        for attempt in 0..attempts {
            if self.probe(target).await {
                return Ok(());
            }
            if attempt + 1 == attempts {
                break;
            }
            if let Err(err) = self.host.install_agent(target).await {
                debug!(
                    target = "aura_relay::delivery",
                    context = %target,
                    attempt,
                    error = %err,
                    "agent installation failed"
                );
            }
            sleep(self.policy.inject_base_delay * 2u32.pow(attempt)).await;
        }
        Err(DeliveryError::InjectFailed { attempts })
    }

    async fn probe(&self, target: TargetId) -> bool {
        match timeout(
            self.policy.probe_timeout,
            self.host.send(target, ContextMessage::Ping),
        )
        .await
        {
            Ok(Ok(Some(ContextReply::Pong(pong)))) => pong.pong,
            Ok(Ok(_)) => false,
            Ok(Err(err)) => {
                debug!(
                    target = "aura_relay::delivery",
                    context = %target,
                    error = %err,
                    "probe failed"
                );
                false
            }
            Err(_) => {
                debug!(
                    target = "aura_relay::delivery",
                    context = %target,
                    "probe timed out"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aura_proto::ReplaceMethod;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Script {
        active: Option<TargetId>,
        installed: bool,
        installs_ignored: bool,
        hang_probes: bool,
        send_error: Option<HostError>,
        reply: Option<ContextReply>,
        probes: Vec<Instant>,
        installs: u32,
        delivered: Vec<Command>,
    }

    #[derive(Default)]
    struct ScriptedHost {
        script: Mutex<Script>,
    }

    impl ScriptedHost {
        fn with(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl ContextHost for ScriptedHost {
        fn active_target(&self) -> Option<TargetId> {
            self.script.lock().active
        }

        fn targets(&self) -> Vec<TargetId> {
            self.script.lock().active.into_iter().collect()
        }

        async fn send(
            &self,
            _target: TargetId,
            message: ContextMessage,
        ) -> Result<Option<ContextReply>, HostError> {
            let hang = {
                let mut script = self.script.lock();
                match message {
                    ContextMessage::Ping => {
                        script.probes.push(Instant::now());
                        if !script.installed {
                            return Err(HostError::NoReceiver);
                        }
                        if !script.hang_probes {
                            return Ok(Some(ContextReply::pong()));
                        }
                        true
                    }
                    ContextMessage::ReplaceRange(command) => {
                        script.delivered.push(command);
                        if let Some(err) = script.send_error.clone() {
                            return Err(err);
                        }
                        return Ok(script.reply.clone());
                    }
                    ContextMessage::ExtensionReady => return Ok(None),
                }
            };
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(None)
        }

        async fn install_agent(&self, _target: TargetId) -> Result<(), HostError> {
            let mut script = self.script.lock();
            script.installs += 1;
            if !script.installs_ignored {
                script.installed = true;
            }
            Ok(())
        }
    }

    fn applied(id: &str) -> ContextReply {
        ContextReply::Replaced(ReplaceResult::applied(
            RequestId::new(id),
            ReplaceMethod::SetRangeText,
            5,
            5,
        ))
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn three_failed_probes_give_up_without_a_fourth() {
        let host = ScriptedHost::with(Script {
            active: Some(TargetId(1)),
            installs_ignored: true,
            ..Script::default()
        });
        let delivery = Delivery::new(host.clone(), DeliveryPolicy::default());
        let started = Instant::now();

        let result = delivery.deliver(Command::replace("r1", 0, 1, "x")).await;

        assert_eq!(result.error, Some(ErrorKind::InjectFailed));
        assert_eq!(result.request_id, RequestId::new("r1"));
        let script = host.script.lock();
        let offsets: Vec<_> = script.probes.iter().map(|at| *at - started).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_millis(50),
                Duration::from_millis(150)
            ]
        );
        assert_eq!(script.installs, 2);
        assert!(script.delivered.is_empty());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn installs_the_agent_then_delivers() {
        let host = ScriptedHost::with(Script {
            active: Some(TargetId(1)),
            reply: Some(applied("r2")),
            ..Script::default()
        });
        let delivery = Delivery::new(host.clone(), DeliveryPolicy::default());

        let result = delivery.deliver(Command::replace("r2", 6, 11, "there")).await;

        assert!(result.success);
        assert_eq!(Some(ContextReply::Replaced(result)), Some(applied("r2")));
        let script = host.script.lock();
        assert_eq!(script.probes.len(), 2);
        assert_eq!(script.installs, 1);
        assert_eq!(script.delivered.len(), 1);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn engine_failures_pass_through_unchanged() {
        let failure = ReplaceResult::failed(RequestId::new("r3"), ErrorKind::RangeMismatch)
            .with_details("expected \"foo\" at 0..3 but found \"bar\"");
        let host = ScriptedHost::with(Script {
            active: Some(TargetId(1)),
            installed: true,
            reply: Some(ContextReply::Replaced(failure.clone())),
            ..Script::default()
        });
        let delivery = Delivery::new(host, DeliveryPolicy::default());
        let result = delivery.deliver(Command::replace("r3", 0, 3, "x")).await;
        assert_eq!(result, failure);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn no_focused_context_is_no_tab() {
        let host = ScriptedHost::with(Script::default());
        let delivery = Delivery::new(host.clone(), DeliveryPolicy::default());
        let result = delivery.deliver(Command::replace(5, 0, 0, "x")).await;
        assert_eq!(result.error, Some(ErrorKind::NoTab));
        assert_eq!(result.request_id, RequestId::new(5));
        assert!(host.script.lock().probes.is_empty());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn send_errors_carry_the_message() {
        let host = ScriptedHost::with(Script {
            active: Some(TargetId(1)),
            installed: true,
            send_error: Some(HostError::AgentGone(TargetId(1))),
            ..Script::default()
        });
        let delivery = Delivery::new(host, DeliveryPolicy::default());
        let result = delivery.deliver(Command::replace("r4", 0, 0, "x")).await;
        assert_eq!(result.error, Some(ErrorKind::SendFailed));
        assert_eq!(
            result.details.as_deref(),
            Some("agent in ctx-1 stopped before replying")
        );
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn silent_agent_is_no_response() {
        let host = ScriptedHost::with(Script {
            active: Some(TargetId(1)),
            installed: true,
            reply: None,
            ..Script::default()
        });
        let delivery = Delivery::new(host, DeliveryPolicy::default());
        let result = delivery.deliver(Command::replace("r5", 0, 0, "x")).await;
        assert_eq!(result.error, Some(ErrorKind::NoResponse));
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn hung_probes_time_out() {
        let host = ScriptedHost::with(Script {
            active: Some(TargetId(1)),
            installed: true,
            hang_probes: true,
            ..Script::default()
        });
        let delivery = Delivery::new(host.clone(), DeliveryPolicy::default());
        let started = Instant::now();
        let outcome = delivery.ensure_present(TargetId(1)).await;
        assert!(matches!(
            outcome,
            Err(DeliveryError::InjectFailed { attempts: 3 })
        ));
        // Three 500 ms probes plus the 50 ms and 100 ms waits.
        assert_eq!(started.elapsed(), Duration::from_millis(1650));
    }
}
