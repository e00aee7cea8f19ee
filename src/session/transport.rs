use super::SessionError;
use crate::audio::{AudioSink, Microphone};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Data channel label the provider listens on
pub const EVENT_CHANNEL_LABEL: &str = "oai-events";

/// Signals raised by the event channel, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Open,
    Message(String),
    Closed,
}

pub type SignalSender = mpsc::UnboundedSender<ChannelSignal>;

/// Bidirectional text channel carried by the peer connection
#[async_trait]
pub trait EventChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<(), SessionError>;

    /// Best effort; failures are logged by the implementation
    async fn close(&self);
}

/// One peer connection to the provider
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send the microphone as the outgoing audio track
    async fn attach_microphone(&self, microphone: Microphone) -> Result<(), SessionError>;

    /// Create the named data channel. Open, message and close handlers are
    /// registered before this returns and report through `signals`.
    async fn open_event_channel(
        &self,
        label: &str,
        signals: SignalSender,
    ) -> Result<Arc<dyn EventChannel>, SessionError>;

    /// Create the local offer, commit it and return its SDP
    async fn create_offer(&self) -> Result<String, SessionError>;

    /// Commit the provider's answer as the remote description
    async fn apply_answer(&self, sdp: String) -> Result<(), SessionError>;

    /// Stop every outgoing sender that has a track attached
    async fn stop_tracks(&self);

    async fn close(&self);
}

/// Creates peer connections whose remote audio is played through `speaker`
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        speaker: Arc<dyn AudioSink>,
    ) -> Result<Box<dyn PeerTransport>, SessionError>;
}
