//! WebRTC implementation of the transport seam.
//!
//! Manages one `RTCPeerConnection` per session: an outgoing Opus track fed
//! by the microphone, remote audio forwarded to the speaker, and the
//! provider's event data channel.

use super::transport::{ChannelSignal, EventChannel, PeerTransport, SignalSender, TransportFactory};
use super::SessionError;
use crate::audio::{AudioSink, CaptureGuard, Microphone, FRAME_DURATION};
use crate::config::SessionConfig;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds WebRTC peer connections
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        speaker: Arc<dyn AudioSink>,
    ) -> Result<Box<dyn PeerTransport>, SessionError> {
        // Create media engine with Opus codec
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        pc.on_peer_connection_state_change(Box::new(move |state| {
            info!(state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));

        pc.on_ice_connection_state_change(Box::new(move |state| {
            debug!(ice_state = %state, "ICE connection state changed");
            Box::pin(async {})
        }));

        // Remote audio goes straight to the speaker
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let speaker = speaker.clone();
            Box::pin(async move {
                if track.kind() == RTPCodecType::Audio {
                    info!(
                        codec = %track.codec().capability.mime_type,
                        "Remote audio track received"
                    );
                    tokio::spawn(play_remote_track(track, speaker));
                }
            })
        }));

        Ok(Box::new(WebRtcTransport {
            pc,
            capture: Mutex::new(None),
        }))
    }
}

async fn play_remote_track(track: Arc<TrackRemote>, speaker: Arc<dyn AudioSink>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if !packet.payload.is_empty() {
                    speaker.play(&packet.payload);
                }
            }
            Err(e) => {
                debug!(error = %e, "Remote track read ended");
                break;
            }
        }
    }
}

/// Microphone capture attached to the outgoing track
struct Capture {
    guard: CaptureGuard,
    writer: JoinHandle<()>,
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    capture: Mutex<Option<Capture>>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn attach_microphone(&self, microphone: Microphone) -> Result<(), SessionError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "realtime-console".to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP must be drained for interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let (mut frames, guard) = microphone.into_parts();
        let writer = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let sample = Sample {
                    data: frame,
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!(error = %e, "Outgoing audio track closed");
                    break;
                }
            }
        });

        *self.capture.lock().unwrap() = Some(Capture { guard, writer });
        Ok(())
    }

    async fn open_event_channel(
        &self,
        label: &str,
        signals: SignalSender,
    ) -> Result<Arc<dyn EventChannel>, SessionError> {
        let dc = self.pc.create_data_channel(label, None).await?;

        let open_tx = signals.clone();
        dc.on_open(Box::new(move || {
            let _ = open_tx.send(ChannelSignal::Open);
            Box::pin(async {})
        }));

        let message_tx = signals.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            let _ = message_tx.send(ChannelSignal::Message(text));
            Box::pin(async {})
        }));

        dc.on_close(Box::new(move || {
            let _ = signals.send(ChannelSignal::Closed);
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcEventChannel { dc }))
    }

    async fn create_offer(&self) -> Result<String, SessionError> {
        let offer = self.pc.create_offer(None).await?;

        // The provider does not accept trickled candidates, so wait for
        // gathering to finish before handing the offer out
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| SessionError::Transport("local description missing".to_string()))?;

        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), SessionError> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn stop_tracks(&self) {
        for sender in self.pc.get_senders().await {
            if sender.track().await.is_some() {
                if let Err(e) = sender.stop().await {
                    debug!(error = %e, "Failed to stop sender");
                }
            }
        }

        let capture = self.capture.lock().unwrap().take();
        if let Some(capture) = capture {
            capture.guard.stop();
            capture.writer.abort();
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Failed to close peer connection");
        }
    }
}

pub struct WebRtcEventChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl EventChannel for WebRtcEventChannel {
    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> Result<(), SessionError> {
        self.dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!(error = %e, "Failed to close event channel");
        }
    }
}
