use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aura_proto::{
    ConnectionStatus, ContextMessage, ContextReply, ContextRequest, ErrorKind, ReplaceMethod,
    RequestId,
};
use aura_relay::config::RelayConfig;
use aura_relay::host::{ContextHost, HostError, LocalHost, SharedDocument, TargetId};
use aura_relay::supervisor::{ControlReceiver, Supervisor, SupervisorHandle};
use aura_relay::transport::mock::{MockConnector, MockPeer};
use aura_surface::{Document, TextControl};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Relay<H> {
    handle: SupervisorHandle,
    connector: MockConnector,
    peers: mpsc::UnboundedReceiver<MockPeer>,
    host: Arc<H>,
    task: JoinHandle<()>,
}

impl<H> Relay<H> {
    async fn next_peer(&mut self) -> MockPeer {
        self.peers.recv().await.expect("connector dropped")
    }

    async fn stop(self) {
        self.handle.shutdown();
        self.task.await.unwrap();
    }
}

fn start<H: ContextHost>(
    host: Arc<H>,
    handle: SupervisorHandle,
    control: ControlReceiver,
    refusals: usize,
) -> Relay<H> {
    let (connector, peers) = MockConnector::new();
    connector.refuse_next(refusals);
    let supervisor = Supervisor::new(
        connector.clone(),
        host.clone(),
        RelayConfig::default(),
        control,
    );
    let task = tokio::spawn(supervisor.run());
    Relay {
        handle,
        connector,
        peers,
        host,
        task,
    }
}

fn local_relay(refusals: usize) -> Relay<LocalHost> {
    let (handle, control) = SupervisorHandle::channel();
    let host = Arc::new(LocalHost::new(handle.clone()));
    start(host, handle, control, refusals)
}

fn textarea(text: &str) -> Document {
    let mut document = Document::new();
    let root = document.root();
    let field = document.append_control(root, TextControl::textarea(text));
    document.focus(field);
    document
}

fn field_value(document: &SharedDocument) -> String {
    let document = document.lock();
    let field = document.active_element().unwrap();
    document.control(field).unwrap().value().to_string()
}

fn replace_frame(request_id: &str, start: usize, end: usize, text: &str) -> serde_json::Value {
    json!({
        "type": "replace-range",
        "requestId": request_id,
        "payload": {"start": start, "end": end, "newText": text}
    })
}

#[test_timeout::tokio_timeout_test(paused)]
async fn replace_round_trip_through_the_focused_context() {
    let mut relay = local_relay(0);
    let (_, document) = relay.host.open(textarea("hello world"));
    let mut peer = relay.next_peer().await;

    peer.send_json(&json!({
        "type": "replace-range",
        "requestId": "req-1",
        "payload": {"start": 6, "end": 11, "newText": "there", "expectedOriginal": "world"}
    }));
    let reply = peer.recv_reply().await.unwrap();

    assert!(reply.success, "{reply:?}");
    assert_eq!(reply.request_id, RequestId::new("req-1"));
    assert_eq!(reply.method, Some(ReplaceMethod::SetRangeText));
    assert_eq!(reply.replaced_length, Some(5));
    assert_eq!(reply.new_length, Some(5));
    assert_eq!(field_value(&document), "hello there");
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn commands_are_answered_in_order() {
    let mut relay = local_relay(0);
    let (_, document) = relay.host.open(textarea("abc"));
    let mut peer = relay.next_peer().await;

    peer.send_json(&replace_frame("a", 0, 1, "A"));
    peer.send_json(&replace_frame("b", 1, 2, "B"));
    peer.send_json(&replace_frame("c", 3, 3, "!"));

    let ids: Vec<_> = [
        peer.recv_reply().await.unwrap(),
        peer.recv_reply().await.unwrap(),
        peer.recv_reply().await.unwrap(),
    ]
    .into_iter()
    .map(|reply| (reply.request_id, reply.success))
    .collect();
    assert_eq!(
        ids,
        vec![
            (RequestId::new("a"), true),
            (RequestId::new("b"), true),
            (RequestId::new("c"), true),
        ]
    );
    assert_eq!(field_value(&document), "ABc!");
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn malformed_payload_still_gets_an_answer() {
    let mut relay = local_relay(0);
    relay.host.open(textarea("x"));
    let mut peer = relay.next_peer().await;

    peer.send("not json at all");
    peer.send_json(&json!({"type": "something-else", "requestId": "ignored"}));
    peer.send_json(&json!({
        "type": "replace-range",
        "requestId": "bad-1",
        "payload": {"start": "six", "end": 11}
    }));
    peer.send_json(&replace_frame("inverted", 4, 2, "x"));

    let first = peer.recv_reply().await.unwrap();
    assert_eq!(first.request_id, RequestId::new("bad-1"));
    assert!(!first.success);
    assert_eq!(first.error, Some(ErrorKind::Exception));
    assert!(first.details.is_some());

    let second = peer.recv_reply().await.unwrap();
    assert_eq!(second.request_id, RequestId::new("inverted"));
    assert_eq!(second.error, Some(ErrorKind::Exception));
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn no_focused_context_is_no_tab() {
    let mut relay = local_relay(0);
    let mut peer = relay.next_peer().await;
    peer.send_json(&replace_frame("lonely", 0, 0, "x"));
    let reply = peer.recv_reply().await.unwrap();
    assert_eq!(reply.error, Some(ErrorKind::NoTab));
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!({"requestId": "lonely", "success": false, "error": "no-tab"})
    );
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn blocked_installation_is_inject_failed() {
    let mut relay = local_relay(0);
    let (_, document) = relay.host.open(textarea("keep me"));
    relay.host.block_installs(true);
    let mut peer = relay.next_peer().await;

    peer.send_json(&replace_frame("r", 0, 4, "lose"));
    let reply = peer.recv_reply().await.unwrap();

    assert_eq!(reply.error, Some(ErrorKind::InjectFailed));
    assert_eq!(field_value(&document), "keep me");
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn reconnects_with_growing_backoff() {
    let started = Instant::now();
    let mut relay = local_relay(3);
    let peer = relay.next_peer().await;

    let offsets: Vec<_> = relay
        .connector
        .attempts()
        .iter()
        .map(|at| *at - started)
        .collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Duration::from_millis(3500),
        ]
    );
    // Let the supervisor see the open before asking it.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        relay.handle.check_connection().await,
        Some(ConnectionStatus {
            connected: true,
            backoff: 500
        })
    );

    // A success resets the delay back to the base.
    let dropped_at = Instant::now();
    peer.close();
    let _peer = relay.next_peer().await;
    let attempts = relay.connector.attempts();
    assert_eq!(attempts.len(), 5);
    assert_eq!(attempts[4] - dropped_at, Duration::from_millis(500));
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn check_connection_reports_backoff_while_down() {
    let (handle, control) = SupervisorHandle::channel();
    let host = Arc::new(LocalHost::new(handle.clone()));
    let relay = start(host.clone(), handle, control, 100);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (target, _) = host.open(textarea(""));
    let status = host
        .request(target, ContextRequest::CheckConnection)
        .await
        .unwrap();
    assert!(!status.connected);
    assert_eq!(status.backoff, 1000);

    assert_eq!(host.request(target, ContextRequest::Noop).await, None);
    relay.stop().await;
}

#[derive(Default)]
struct RecordingHost {
    seen: Mutex<Vec<(TargetId, &'static str)>>,
}

#[async_trait]
impl ContextHost for RecordingHost {
    fn active_target(&self) -> Option<TargetId> {
        Some(TargetId(1))
    }

    fn targets(&self) -> Vec<TargetId> {
        vec![TargetId(1), TargetId(2)]
    }

    async fn send(
        &self,
        target: TargetId,
        message: ContextMessage,
    ) -> Result<Option<ContextReply>, HostError> {
        self.seen.lock().push((target, message.kind()));
        match message {
            ContextMessage::Ping => Ok(Some(ContextReply::pong())),
            ContextMessage::ExtensionReady => Ok(None),
            ContextMessage::ReplaceRange(_) => Err(HostError::NoReceiver),
        }
    }

    async fn install_agent(&self, _target: TargetId) -> Result<(), HostError> {
        Ok(())
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn every_connect_announces_extension_ready() {
    let (handle, control) = SupervisorHandle::channel();
    let host = Arc::new(RecordingHost::default());
    let mut relay = start(host.clone(), handle, control, 0);

    let peer = relay.next_peer().await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    peer.close();
    let _peer = relay.next_peer().await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    let announced: Vec<_> = host
        .seen
        .lock()
        .iter()
        .filter(|(_, kind)| *kind == "extension-ready")
        .map(|(target, _)| *target)
        .collect();
    assert_eq!(
        announced,
        vec![TargetId(1), TargetId(2), TargetId(1), TargetId(2)]
    );
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn send_failures_reach_the_client() {
    let (handle, control) = SupervisorHandle::channel();
    let host = Arc::new(RecordingHost::default());
    let mut relay = start(host, handle, control, 0);
    let mut peer = relay.next_peer().await;

    peer.send_json(&replace_frame("r", 0, 0, "x"));
    let reply = peer.recv_reply().await.unwrap();

    assert_eq!(reply.error, Some(ErrorKind::SendFailed));
    assert_eq!(
        reply.details.as_deref(),
        Some("could not establish connection: receiving end does not exist")
    );
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn heartbeat_flows_while_connected() {
    let mut relay = local_relay(0);
    let mut peer = relay.next_peer().await;
    let connected_at = Instant::now();

    let frame = peer.recv().await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "heartbeat");
    assert_eq!(connected_at.elapsed(), Duration::from_secs(20));
    relay.stop().await;
}

#[test_timeout::tokio_timeout_test(120, paused)]
async fn liveness_traffic_stops_after_the_peer_hangs_up() {
    let (handle, control) = SupervisorHandle::channel();
    let host = Arc::new(RecordingHost::default());
    let mut relay = start(host.clone(), handle, control, 0);
    let mut peer = relay.next_peer().await;
    relay.connector.refuse_next(100);
    let pings = || {
        host.seen
            .lock()
            .iter()
            .filter(|(_, kind)| *kind == "ping")
            .count()
    };

    let frame = peer.recv().await.unwrap();
    assert!(frame.contains("heartbeat"), "{frame}");
    tokio::time::sleep(Duration::from_millis(1)).await;
    let pinged = pings();
    assert_eq!(pinged, 2);

    peer.hang_up();
    tokio::time::sleep(Duration::from_secs(40)).await;

    assert_eq!(peer.recv().await, None);
    assert_eq!(pings(), pinged);
    relay.stop().await;
}
