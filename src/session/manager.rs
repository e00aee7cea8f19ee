use super::events::Event;
use super::history::EventHistory;
use super::transport::{
    ChannelSignal, EventChannel, PeerTransport, TransportFactory, EVENT_CHANNEL_LABEL,
};
use super::SessionError;
use crate::audio::{MediaDevices, Microphone};
use crate::credentials::CredentialSource;
use crate::provider::ProviderClient;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// Diagnostics kept for the console
const MAX_DIAGNOSTICS: usize = 100;

/// Inbound events, in arrival order
pub type EventStream = UnboundedReceiverStream<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
}

/// A runtime problem that was logged instead of returned
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Everything one connection holds. Released together, never piecemeal.
struct Session {
    id: Uuid,
    transport: Box<dyn PeerTransport>,
    channel: Arc<dyn EventChannel>,
    pump: JoinHandle<()>,
}

impl Session {
    async fn release(self) {
        self.pump.abort();
        release_resources(self.transport, Some(self.channel)).await;
    }
}

/// Channel close, then senders, then the peer connection
async fn release_resources(transport: Box<dyn PeerTransport>, channel: Option<Arc<dyn EventChannel>>) {
    if let Some(channel) = channel {
        channel.close().await;
    }
    transport.stop_tracks().await;
    transport.close().await;
}

struct Inner {
    credentials: Arc<dyn CredentialSource>,
    provider: ProviderClient,
    transports: Arc<dyn TransportFactory>,
    devices: Arc<dyn MediaDevices>,
    state: watch::Sender<SessionState>,
    session: tokio::sync::Mutex<Option<Session>>,
    // Separate from `session` so sends never wait on an in-flight start
    channel: Mutex<Option<Arc<dyn EventChannel>>>,
    history: EventHistory,
    inbound_tx: mpsc::UnboundedSender<Event>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Session state {:?} -> {:?}", previous, state);
        }
    }

    fn record_diagnostic(&self, message: String) {
        tracing::warn!("{}", message);
        let mut diagnostics = self.diagnostics.lock().unwrap();
        diagnostics.push(Diagnostic {
            at: Utc::now(),
            message,
        });
        if diagnostics.len() > MAX_DIAGNOSTICS {
            let excess = diagnostics.len() - MAX_DIAGNOSTICS;
            diagnostics.drain(..excess);
        }
    }
}

/// Owns the lifecycle of one realtime connection.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        provider: ProviderClient,
        transports: Arc<dyn TransportFactory>,
        devices: Arc<dyn MediaDevices>,
        history_limit: usize,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                credentials,
                provider,
                transports,
                devices,
                state,
                session: tokio::sync::Mutex::new(None),
                channel: Mutex::new(None),
                history: EventHistory::new(history_limit),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                diagnostics: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Whether transport resources are currently held
    pub async fn has_session(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    /// Most recent first
    pub fn history(&self) -> Vec<Event> {
        self.inner.history.snapshot()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.diagnostics.lock().unwrap().clone()
    }

    /// Inbound events. Only the first call returns the stream.
    pub fn subscribe(&self) -> Option<EventStream> {
        self.inner
            .inbound_rx
            .lock()
            .unwrap()
            .take()
            .map(UnboundedReceiverStream::new)
    }

    /// Connect to the provider. A no-op unless the session is idle.
    ///
    /// Any failure releases everything acquired so far and leaves the
    /// session idle. The session becomes active once the event channel opens.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut slot = self.inner.session.lock().await;

        let state = self.state();
        if state != SessionState::Idle || slot.is_some() {
            tracing::info!("Ignoring start: session is {:?}", state);
            return Ok(());
        }

        self.inner.set_state(SessionState::Starting);

        match self.establish().await {
            Ok(session) => {
                tracing::info!(session_id = %session.id, "Session established, waiting for event channel");
                *self.inner.channel.lock().unwrap() = Some(session.channel.clone());
                *slot = Some(session);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start session: {}", e);
                self.inner.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Session, SessionError> {
        let credential = self.inner.credentials.acquire().await?;

        let microphone = self.inner.devices.open_microphone().await?;

        let transport = self
            .inner
            .transports
            .create(self.inner.devices.speaker())
            .await?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let mut channel = None;

        let handshake = self
            .handshake(&*transport, microphone, signal_tx, &credential, &mut channel)
            .await;

        if let Err(e) = handshake {
            release_resources(transport, channel).await;
            return Err(e);
        }

        let Some(channel) = channel else {
            release_resources(transport, None).await;
            return Err(SessionError::Transport("event channel missing".to_string()));
        };

        let pump = tokio::spawn(pump_signals(self.inner.clone(), signal_rx));

        Ok(Session {
            id: Uuid::new_v4(),
            transport,
            channel,
            pump,
        })
    }

    async fn handshake(
        &self,
        transport: &dyn PeerTransport,
        microphone: Microphone,
        signals: mpsc::UnboundedSender<ChannelSignal>,
        credential: &str,
        channel: &mut Option<Arc<dyn EventChannel>>,
    ) -> Result<(), SessionError> {
        transport.attach_microphone(microphone).await?;

        *channel = Some(
            transport
                .open_event_channel(EVENT_CHANNEL_LABEL, signals)
                .await?,
        );

        let offer = transport.create_offer().await?;
        tracing::debug!(model = self.inner.provider.model(), "Submitting offer");

        let answer = self.inner.provider.negotiate(credential, offer).await?;
        transport.apply_answer(answer).await?;

        Ok(())
    }

    /// Tear the session down. Always ends idle; teardown errors are only logged.
    pub async fn stop(&self) {
        let session = self.inner.session.lock().await.take();
        self.inner.channel.lock().unwrap().take();

        match session {
            Some(session) => {
                let id = session.id;
                session.release().await;
                tracing::info!(session_id = %id, "Session stopped");
            }
            None => tracing::debug!("Stop requested with no session"),
        }

        self.inner.set_state(SessionState::Idle);
    }

    /// Send an event over the open channel and record it in history.
    ///
    /// The wire payload never carries `timestamp`; the history entry always
    /// does. Returns the recorded entry, or `None` when nothing was sent.
    pub async fn send_event(&self, mut event: Event) -> Option<Event> {
        let kind = event.kind().unwrap_or("unknown").to_string();

        let channel = self.inner.channel.lock().unwrap().clone();
        let Some(channel) = channel.filter(|c| c.is_open()) else {
            self.inner.record_diagnostic(format!(
                "Dropped outgoing {} event: event channel is not open",
                kind
            ));
            return None;
        };

        event.ensure_event_id();

        let wire = match event.to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                self.inner
                    .record_diagnostic(format!("Failed to serialize {} event: {}", kind, e));
                return None;
            }
        };

        if let Err(e) = channel.send_text(wire).await {
            self.inner
                .record_diagnostic(format!("Failed to send {} event: {}", kind, e));
            return None;
        }

        event.ensure_timestamp();
        self.inner.history.prepend(event.clone());
        Some(event)
    }

    /// Send a user text message followed by a response request
    pub async fn send_text_message(&self, text: &str) -> bool {
        let item = self.send_event(Event::user_message(text)).await.is_some();
        let response = self.send_event(Event::response_create()).await.is_some();
        item && response
    }
}

/// Applies channel signals to shared state until the session is released
async fn pump_signals(inner: Arc<Inner>, mut signals: mpsc::UnboundedReceiver<ChannelSignal>) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ChannelSignal::Open => {
                inner.history.clear();
                inner.set_state(SessionState::Active);
                tracing::info!("Event channel open, session active");
            }
            ChannelSignal::Message(text) => match Event::parse(&text) {
                Ok(mut event) => {
                    event.ensure_event_id();
                    event.ensure_timestamp();
                    tracing::trace!(kind = event.kind().unwrap_or("unknown"), "Inbound event");
                    inner.history.prepend(event.clone());
                    let _ = inner.inbound_tx.send(event);
                }
                Err(e) => {
                    inner.record_diagnostic(format!("Dropped malformed inbound frame: {}", e));
                }
            },
            ChannelSignal::Closed => {
                inner.record_diagnostic("Event channel closed".to_string());
            }
        }
    }
}
