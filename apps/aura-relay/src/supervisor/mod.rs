//! The relay's event loop.
//!
//! One task owns the [`Connection`] and reacts to three inputs: channel
//! events from the current connector task, control messages from contexts
//! and the binary, and the reconnect timer. Commands are handed to a single
//! dispatcher task, so at most one command is in flight at a time.

use std::sync::Arc;

use aura_proto::{
    ClientMessage, Command, ConnectionStatus, ContextMessage, ContextRequest, ErrorKind,
    ReplaceResult,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::host::{ContextHost, TargetId};
use crate::transport::{ChannelEvent, Connector, EventSender, Outbound};

pub mod connection;
pub mod delivery;
pub mod heartbeat;

use connection::Connection;
use delivery::Delivery;
use heartbeat::HeartbeatPublisher;

#[derive(Debug)]
pub enum Control {
    CheckConnection(oneshot::Sender<ConnectionStatus>),
    /// A context replied to something; it is alive.
    KeepAlive(TargetId),
    Shutdown,
}

pub type ControlReceiver = mpsc::UnboundedReceiver<Control>;

/// Cheap, cloneable way to talk to a running [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl SupervisorHandle {
    pub fn channel() -> (Self, ControlReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// `None` once the supervisor has stopped.
    pub async fn check_connection(&self) -> Option<ConnectionStatus> {
        let (reply, status) = oneshot::channel();
        self.tx.send(Control::CheckConnection(reply)).ok()?;
        status.await.ok()
    }

    pub fn keep_alive(&self, target: TargetId) {
        let _ = self.tx.send(Control::KeepAlive(target));
    }

    /// Handles a request raised inside a context.
    pub async fn request(
        &self,
        target: TargetId,
        request: ContextRequest,
    ) -> Option<ConnectionStatus> {
        match request {
            ContextRequest::Noop => {
                self.keep_alive(target);
                None
            }
            ContextRequest::CheckConnection => self.check_connection().await,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Control::Shutdown);
    }
}

struct Job {
    command: Command,
    reply_to: Outbound,
}

enum Step {
    Event(ChannelEvent),
    Control(Control),
    Retry,
    Stop,
}

pub struct Supervisor<C, H> {
    connector: Arc<C>,
    host: Arc<H>,
    config: RelayConfig,
    connection: Connection,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    control: ControlReceiver,
    link: Option<JoinHandle<()>>,
}

impl<C: Connector, H: ContextHost> Supervisor<C, H> {
    pub fn new(connector: C, host: Arc<H>, config: RelayConfig, control: ControlReceiver) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(connector),
            host,
            connection: Connection::new(config.backoff),
            config,
            events_tx,
            events_rx,
            control,
            link: None,
        }
    }

    /// Connects immediately, then keeps the channel up until shut down.
    pub async fn run(mut self) {
        let (jobs, queue) = mpsc::unbounded_channel();
        let delivery = Delivery::new(self.host.clone(), self.config.delivery);
        let dispatcher = tokio::spawn(dispatch(delivery, queue));

        self.connect();
        loop {
            let retry_at = self.connection.retry_at();
            let step = tokio::select! {
                Some(event) = self.events_rx.recv() => Step::Event(event),
                Some(control) = self.control.recv() => Step::Control(control),
                _ = retry_timer(retry_at) => Step::Retry,
                else => Step::Stop,
            };
            match step {
                Step::Event(event) => self.on_event(event, &jobs),
                Step::Control(Control::Shutdown) | Step::Stop => break,
                Step::Control(control) => self.on_control(control),
                Step::Retry => self.connect(),
            }
        }

        info!(target = "aura_relay::supervisor", "shutting down");
        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.connection.close();
        dispatcher.abort();
    }

    fn connect(&mut self) {
        let Some(generation) = self.connection.begin_connect() else {
            return;
        };
        debug!(target = "aura_relay::supervisor", generation, "connecting");
        let connector = self.connector.clone();
        let events = self.events_tx.clone();
        self.link = Some(tokio::spawn(async move {
            if let Err(error) = connector.connect(generation, events.clone()).await {
                let _ = events.send(ChannelEvent::Failed { generation, error });
            }
        }));
    }

    fn on_event(&mut self, event: ChannelEvent, jobs: &mpsc::UnboundedSender<Job>) {
        match event {
            ChannelEvent::Opened {
                generation,
                outbound,
            } => {
                if !self.connection.opened(generation, outbound.clone()) {
                    debug!(
                        target = "aura_relay::supervisor",
                        generation, "dropping stale channel"
                    );
                    return;
                }
                info!(target = "aura_relay::supervisor", generation, "connected");
                let heartbeat = HeartbeatPublisher::new(
                    outbound,
                    self.host.clone(),
                    self.config.delivery.probe_timeout,
                )
                .spawn(self.config.heartbeat_interval);
                self.connection.attach_heartbeat(heartbeat);
                self.announce_ready();
            }
            ChannelEvent::Message { generation, text } => {
                if self.connection.connected_generation() != Some(generation) {
                    debug!(
                        target = "aura_relay::supervisor",
                        generation, "ignoring frame from a stale channel"
                    );
                    return;
                }
                self.on_frame(&text, jobs);
            }
            ChannelEvent::Closed { generation, reason } => {
                self.on_lost(generation, reason.as_deref().unwrap_or("closed"));
            }
            ChannelEvent::Failed { generation, error } => {
                self.on_lost(generation, &error.to_string());
            }
        }
    }

    fn on_frame(&mut self, text: &str, jobs: &mpsc::UnboundedSender<Job>) {
        let Some(outbound) = self.connection.outbound().cloned() else {
            return;
        };
        match ClientMessage::decode(text) {
            Some(ClientMessage::ReplaceRange(command)) => {
                trace!(
                    target = "aura_relay::supervisor",
                    request_id = %command.request_id,
                    "queueing command"
                );
                let _ = jobs.send(Job {
                    command,
                    reply_to: outbound,
                });
            }
            Some(ClientMessage::Malformed { request_id, reason }) => {
                warn!(
                    target = "aura_relay::supervisor",
                    request_id = %request_id,
                    reason = %reason,
                    "malformed command"
                );
                let result =
                    ReplaceResult::failed(request_id, ErrorKind::Exception).with_details(reason);
                reply(&outbound, &result);
            }
            None => trace!(target = "aura_relay::supervisor", "ignoring frame"),
        }
    }

    fn on_lost(&mut self, generation: u64, reason: &str) {
        if let Some(delay) = self.connection.lost(generation, Instant::now()) {
            info!(
                target = "aura_relay::supervisor",
                generation,
                reason,
                retry_in_ms = delay.as_millis() as u64,
                "disconnected"
            );
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::CheckConnection(reply) => {
                let _ = reply.send(self.connection.status());
            }
            Control::KeepAlive(target) => {
                trace!(target = "aura_relay::supervisor", context = %target, "keep-alive");
            }
            Control::Shutdown => {}
        }
    }

    /// Tells every context a fresh channel is up. Fire and forget.
    fn announce_ready(&self) {
        let host = self.host.clone();
        tokio::spawn(async move {
            for target in host.targets() {
                if let Err(err) = host.send(target, ContextMessage::ExtensionReady).await {
                    debug!(
                        target = "aura_relay::supervisor",
                        context = %target,
                        error = %err,
                        "extension-ready not delivered"
                    );
                }
            }
        });
    }
}

async fn dispatch<H: ContextHost>(delivery: Delivery<H>, mut queue: mpsc::UnboundedReceiver<Job>) {
    while let Some(Job { command, reply_to }) = queue.recv().await {
        let result = delivery.deliver(command).await;
        reply(&reply_to, &result);
    }
}

fn reply(outbound: &Outbound, result: &ReplaceResult) {
    if let Err(err) = outbound.send_json(result) {
        debug!(
            target = "aura_relay::supervisor",
            request_id = %result.request_id,
            error = %err,
            "reply abandoned"
        );
    }
}

async fn retry_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
