//! Session lifecycle against an in-process transport and a mock provider.

use async_trait::async_trait;
use futures::StreamExt;
use mockito::{Matcher, ServerGuard};
use realtime_console::audio::{AudioSink, CaptureGuard, DiscardSink, MediaDevices, Microphone};
use realtime_console::config::ProviderConfig;
use realtime_console::credentials::{CredentialStore, MemoryStore};
use realtime_console::provider::ProviderClient;
use realtime_console::session::{
    ChannelSignal, EventChannel, PeerTransport, SignalSender, TransportFactory,
    EVENT_CHANNEL_LABEL,
};
use realtime_console::{Event, SessionError, SessionManager, SessionState};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const OFFER: &str = "v=0 fake-offer";
const ANSWER: &str = "v=0 fake-answer";
const MODEL: &str = "test-realtime-model";

/// Shared record of everything the fake transport was asked to do
#[derive(Default)]
struct Recorder {
    transports_created: AtomicUsize,
    microphone_attached: AtomicBool,
    tracks_stopped: AtomicBool,
    transport_closed: AtomicBool,
    channel_opened_with: Mutex<Option<String>>,
    channel_open: AtomicBool,
    channel_closed: AtomicBool,
    answer: Mutex<Option<String>>,
    sent: Mutex<Vec<String>>,
    signals: Mutex<Option<SignalSender>>,
}

impl Recorder {
    fn signal(&self, signal: ChannelSignal) {
        let signals = self.signals.lock().unwrap();
        signals
            .as_ref()
            .expect("event channel was never opened")
            .send(signal)
            .unwrap();
    }

    fn open_channel(&self) {
        self.channel_open.store(true, Ordering::SeqCst);
        self.signal(ChannelSignal::Open);
    }

    fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

struct FakeFactory {
    rec: Arc<Recorder>,
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        _speaker: Arc<dyn AudioSink>,
    ) -> Result<Box<dyn PeerTransport>, SessionError> {
        self.rec.transports_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransport {
            rec: self.rec.clone(),
            capture: Mutex::new(None),
        }))
    }
}

struct FakeTransport {
    rec: Arc<Recorder>,
    capture: Mutex<Option<CaptureGuard>>,
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn attach_microphone(&self, microphone: Microphone) -> Result<(), SessionError> {
        let (_frames, guard) = microphone.into_parts();
        *self.capture.lock().unwrap() = Some(guard);
        self.rec.microphone_attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn open_event_channel(
        &self,
        label: &str,
        signals: SignalSender,
    ) -> Result<Arc<dyn EventChannel>, SessionError> {
        *self.rec.channel_opened_with.lock().unwrap() = Some(label.to_string());
        *self.rec.signals.lock().unwrap() = Some(signals);
        Ok(Arc::new(FakeChannel {
            rec: self.rec.clone(),
        }))
    }

    async fn create_offer(&self) -> Result<String, SessionError> {
        Ok(OFFER.to_string())
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), SessionError> {
        *self.rec.answer.lock().unwrap() = Some(sdp);
        Ok(())
    }

    async fn stop_tracks(&self) {
        self.capture.lock().unwrap().take();
        self.rec.tracks_stopped.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.rec.transport_closed.store(true, Ordering::SeqCst);
    }
}

struct FakeChannel {
    rec: Arc<Recorder>,
}

#[async_trait]
impl EventChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.rec.channel_open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> Result<(), SessionError> {
        self.rec.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.rec.channel_open.store(false, Ordering::SeqCst);
        self.rec.channel_closed.store(true, Ordering::SeqCst);
    }
}

/// Microphone that is either granted (no frames) or denied
struct FakeDevices {
    deny: bool,
    sink: Arc<DiscardSink>,
}

impl FakeDevices {
    fn granted() -> Self {
        Self {
            deny: false,
            sink: Arc::new(DiscardSink::default()),
        }
    }

    fn denied() -> Self {
        Self {
            deny: true,
            sink: Arc::new(DiscardSink::default()),
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_microphone(&self) -> Result<Microphone, SessionError> {
        if self.deny {
            return Err(SessionError::Media("permission denied".to_string()));
        }
        let (_tx, rx) = mpsc::channel(1);
        let (stop_tx, _stop_rx) = oneshot::channel();
        Ok(Microphone::new(rx, CaptureGuard::new(stop_tx)))
    }

    fn speaker(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }
}

struct Harness {
    manager: SessionManager,
    rec: Arc<Recorder>,
    _server: ServerGuard,
}

/// Mock provider: probe answers `probe_status`, negotiation answers
/// `handshake_status` with `handshake_body`
async fn provider_server(probe_status: usize, handshake_status: usize, handshake_body: &str) -> ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/models")
        .with_status(probe_status)
        .with_body(r#"{"data":[]}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/realtime")
        .match_query(Matcher::UrlEncoded("model".into(), MODEL.into()))
        .match_header("content-type", "application/sdp")
        .match_header("authorization", "Bearer sk-test")
        .match_body(OFFER)
        .with_status(handshake_status)
        .with_body(handshake_body)
        .create_async()
        .await;
    server
}

async fn harness(
    server: ServerGuard,
    credential: Option<&str>,
    devices: FakeDevices,
) -> Harness {
    let provider = ProviderClient::new(&ProviderConfig {
        base_url: server.url(),
        model: MODEL.to_string(),
        timeout_secs: 5,
        ..Default::default()
    })
    .unwrap();

    let credentials = CredentialStore::new(Arc::new(MemoryStore::new()), provider.clone());
    if let Some(credential) = credential {
        credentials.set_credential(credential).unwrap();
    }

    let rec = Arc::new(Recorder::default());
    let manager = SessionManager::new(
        Arc::new(credentials),
        provider,
        Arc::new(FakeFactory { rec: rec.clone() }),
        Arc::new(devices),
        0,
    );

    Harness {
        manager,
        rec,
        _server: server,
    }
}

async fn ready_harness() -> Harness {
    let server = provider_server(200, 201, ANSWER).await;
    harness(server, Some("sk-test"), FakeDevices::granted()).await
}

async fn wait_for_state(manager: &SessionManager, state: SessionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .unwrap();
}

async fn active_harness() -> Harness {
    let h = ready_harness().await;
    h.manager.start().await.unwrap();
    h.rec.open_channel();
    wait_for_state(&h.manager, SessionState::Active).await;
    h
}

async fn assert_released(h: &Harness) {
    assert_eq!(h.manager.state(), SessionState::Idle);
    assert!(!h.manager.has_session().await);
}

#[tokio::test]
async fn test_start_without_credential_creates_nothing() {
    let server = provider_server(200, 201, ANSWER).await;
    let h = harness(server, None, FakeDevices::granted()).await;

    let err = h.manager.start().await.unwrap_err();

    assert!(matches!(err, SessionError::MissingCredential));
    assert_eq!(h.rec.transports_created.load(Ordering::SeqCst), 0);
    assert_released(&h).await;
}

#[tokio::test]
async fn test_start_with_rejected_credential_creates_nothing() {
    let server = provider_server(401, 201, ANSWER).await;
    let h = harness(server, Some("sk-test"), FakeDevices::granted()).await;

    let err = h.manager.start().await.unwrap_err();

    assert!(matches!(err, SessionError::InvalidCredential));
    assert!(err.to_string().to_lowercase().contains("invalid credential"));
    assert_eq!(h.rec.transports_created.load(Ordering::SeqCst), 0);
    assert_released(&h).await;
}

#[tokio::test]
async fn test_start_with_denied_microphone_creates_no_transport() {
    let server = provider_server(200, 201, ANSWER).await;
    let h = harness(server, Some("sk-test"), FakeDevices::denied()).await;

    let err = h.manager.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Media(_)));
    assert_eq!(h.rec.transports_created.load(Ordering::SeqCst), 0);
    assert!(h.rec.channel_opened_with.lock().unwrap().is_none());
    assert_released(&h).await;
}

#[tokio::test]
async fn test_handshake_rejection_releases_everything() {
    let server = provider_server(200, 403, "forbidden").await;
    let h = harness(server, Some("sk-test"), FakeDevices::granted()).await;

    let err = h.manager.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Handshake { status: 403, .. }));
    assert!(err.to_string().contains("forbidden"));
    assert_eq!(h.rec.transports_created.load(Ordering::SeqCst), 1);
    assert!(h.rec.channel_closed.load(Ordering::SeqCst));
    assert!(h.rec.tracks_stopped.load(Ordering::SeqCst));
    assert!(h.rec.transport_closed.load(Ordering::SeqCst));
    assert!(h.rec.answer.lock().unwrap().is_none());
    assert_released(&h).await;
}

#[tokio::test]
async fn test_start_handshakes_then_activates_on_channel_open() {
    let h = ready_harness().await;

    h.manager.start().await.unwrap();

    assert_eq!(h.manager.state(), SessionState::Starting);
    assert!(h.manager.has_session().await);
    assert!(h.rec.microphone_attached.load(Ordering::SeqCst));
    assert_eq!(
        h.rec.channel_opened_with.lock().unwrap().as_deref(),
        Some(EVENT_CHANNEL_LABEL)
    );
    assert_eq!(h.rec.answer.lock().unwrap().as_deref(), Some(ANSWER));

    h.rec.open_channel();
    wait_for_state(&h.manager, SessionState::Active).await;
    assert!(h.manager.is_active());
}

#[tokio::test]
async fn test_second_start_is_ignored() {
    let h = active_harness().await;

    h.manager.start().await.unwrap();

    assert_eq!(h.rec.transports_created.load(Ordering::SeqCst), 1);
    assert!(h.manager.is_active());
}

#[tokio::test]
async fn test_send_text_message_sends_two_frames() {
    let h = active_harness().await;

    assert!(h.manager.send_text_message("hello").await);

    let sent = h.rec.sent_json();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["type"], "conversation.item.create");
    assert_eq!(sent[0]["item"]["content"][0]["text"], "hello");
    assert_eq!(sent[1]["type"], "response.create");
    for frame in &sent {
        assert!(frame.get("timestamp").is_none());
        assert!(frame["event_id"].is_string());
    }

    let history = h.manager.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind(), Some("response.create"));
    assert_eq!(history[1].kind(), Some("conversation.item.create"));
    for entry in &history {
        assert!(entry.timestamp().is_some());
    }
    assert_eq!(history[0].event_id(), sent[1]["event_id"].as_str());
    assert_eq!(history[1].event_id(), sent[0]["event_id"].as_str());
}

#[tokio::test]
async fn test_send_event_keeps_caller_id_and_strips_timestamp() {
    let h = active_harness().await;

    let event = Event::parse(
        r#"{"type":"session.update","event_id":"evt_custom","timestamp":"bogus"}"#,
    )
    .unwrap();
    let recorded = h.manager.send_event(event).await.unwrap();

    let sent = h.rec.sent_json();
    assert_eq!(sent[0]["event_id"], "evt_custom");
    assert!(sent[0].get("timestamp").is_none());
    assert_eq!(recorded.event_id(), Some("evt_custom"));
    assert!(recorded.timestamp().is_some());
}

#[tokio::test]
async fn test_send_event_on_closed_channel_is_reported() {
    let h = ready_harness().await;
    h.manager.start().await.unwrap();

    // Handshake done but the channel has not opened yet
    let result = h.manager.send_event(Event::response_create()).await;

    assert!(result.is_none());
    assert!(h.rec.sent.lock().unwrap().is_empty());
    assert!(h.manager.history().is_empty());
    let diagnostics = h.manager.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("not open"));
}

#[tokio::test]
async fn test_send_without_session_is_reported() {
    let h = ready_harness().await;

    assert!(!h.manager.send_text_message("hello").await);
    assert!(h.rec.sent.lock().unwrap().is_empty());
    assert_eq!(h.manager.diagnostics().len(), 2);
}

#[tokio::test]
async fn test_inbound_events_are_published_and_prepended() {
    let h = active_harness().await;
    let mut events = h.manager.subscribe().unwrap();
    assert!(h.manager.subscribe().is_none());

    h.rec.signal(ChannelSignal::Message(
        r#"{"type":"session.created","event_id":"evt_1"}"#.to_string(),
    ));
    h.rec.signal(ChannelSignal::Message(
        r#"{"type":"response.done"}"#.to_string(),
    ));

    let first = events.next().await.unwrap();
    let second = events.next().await.unwrap();
    assert_eq!(first.event_id(), Some("evt_1"));
    assert!(first.timestamp().is_some());
    assert_eq!(second.kind(), Some("response.done"));
    assert!(second.event_id().is_some());
    assert!(second.timestamp().is_some());

    let history = h.manager.history();
    assert_eq!(history[0].kind(), Some("response.done"));
    assert_eq!(history[1].kind(), Some("session.created"));
}

#[tokio::test]
async fn test_malformed_inbound_frame_is_dropped() {
    let h = active_harness().await;
    let mut events = h.manager.subscribe().unwrap();

    h.rec.signal(ChannelSignal::Message("{not json".to_string()));
    h.rec.signal(ChannelSignal::Message("[1,2,3]".to_string()));
    h.rec.signal(ChannelSignal::Message(r#"{"type":"rate_limits.updated"}"#.to_string()));

    let event = events.next().await.unwrap();
    assert_eq!(event.kind(), Some("rate_limits.updated"));

    assert_eq!(h.manager.history().len(), 1);
    assert_eq!(h.manager.diagnostics().len(), 2);
    assert!(h.manager.is_active());
}

#[tokio::test]
async fn test_channel_open_resets_history() {
    let h = ready_harness().await;
    let mut events = h.manager.subscribe().unwrap();
    h.manager.start().await.unwrap();

    h.rec.signal(ChannelSignal::Message(r#"{"type":"early"}"#.to_string()));
    events.next().await.unwrap();
    assert_eq!(h.manager.history().len(), 1);

    h.rec.open_channel();
    wait_for_state(&h.manager, SessionState::Active).await;
    assert!(h.manager.history().is_empty());
}

#[tokio::test]
async fn test_stop_releases_active_session() {
    let h = active_harness().await;

    h.manager.stop().await;

    assert!(h.rec.channel_closed.load(Ordering::SeqCst));
    assert!(h.rec.tracks_stopped.load(Ordering::SeqCst));
    assert!(h.rec.transport_closed.load(Ordering::SeqCst));
    assert_released(&h).await;

    // Sending after stop is a reported no-op
    assert!(h.manager.send_event(Event::response_create()).await.is_none());
    assert!(h.rec.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent_from_any_state() {
    // Idle
    let h = ready_harness().await;
    h.manager.stop().await;
    h.manager.stop().await;
    assert_released(&h).await;

    // Starting (handshake done, channel not yet open)
    h.manager.start().await.unwrap();
    assert_eq!(h.manager.state(), SessionState::Starting);
    h.manager.stop().await;
    assert_released(&h).await;

    // After a failed start
    let server = provider_server(200, 500, "boom").await;
    let failed = harness(server, Some("sk-test"), FakeDevices::granted()).await;
    assert!(failed.manager.start().await.is_err());
    failed.manager.stop().await;
    assert_released(&failed).await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = active_harness().await;
    h.manager.stop().await;

    h.manager.start().await.unwrap();
    assert_eq!(h.rec.transports_created.load(Ordering::SeqCst), 2);

    h.rec.open_channel();
    wait_for_state(&h.manager, SessionState::Active).await;
}
