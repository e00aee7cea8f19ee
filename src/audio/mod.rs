//! Local audio endpoints for a realtime session.
//!
//! The microphone produces 20 ms Opus frames at 48 kHz mono, which is what
//! the outgoing WebRTC track carries. The speaker receives the Opus payloads
//! of the provider's audio track.

#[cfg(feature = "audio-device")]
pub mod device;

use crate::session::SessionError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Opus sample rate used on both directions
pub const SAMPLE_RATE: u32 = 48_000;

/// Duration of one encoded frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per channel in one frame
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 1000) * 20;

/// Opus TOC + payload for a 20 ms silent frame
pub const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// An open microphone: a stream of encoded frames plus the capture handle.
///
/// Dropping the [`CaptureGuard`] stops the capture.
pub struct Microphone {
    frames: mpsc::Receiver<Bytes>,
    guard: CaptureGuard,
}

impl Microphone {
    pub fn new(frames: mpsc::Receiver<Bytes>, guard: CaptureGuard) -> Self {
        Self { frames, guard }
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Bytes>, CaptureGuard) {
        (self.frames, self.guard)
    }
}

/// Stops the underlying capture when dropped
pub struct CaptureGuard {
    stop: Option<oneshot::Sender<()>>,
}

impl CaptureGuard {
    pub fn new(stop: oneshot::Sender<()>) -> Self {
        Self { stop: Some(stop) }
    }

    pub fn stop(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.signal();
    }
}

/// Receives Opus payloads from the remote audio track
pub trait AudioSink: Send + Sync {
    fn play(&self, packet: &[u8]);
}

/// Access to the local audio hardware
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the microphone. Fails when the device is missing or access is denied.
    async fn open_microphone(&self) -> Result<Microphone, SessionError>;

    /// Playback sink for remote audio
    fn speaker(&self) -> Arc<dyn AudioSink>;
}

/// Devices for headless use: the microphone sends Opus silence and remote
/// audio is discarded.
pub struct SilentDevices {
    sink: Arc<DiscardSink>,
}

impl SilentDevices {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(DiscardSink::default()),
        }
    }

    /// Packets received from the remote track so far
    pub fn packets_received(&self) -> u64 {
        self.sink.packets()
    }
}

impl Default for SilentDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SilentDevices {
    async fn open_microphone(&self) -> Result<Microphone, SessionError> {
        let (tx, rx) = mpsc::channel::<Bytes>(64);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if tx.send(Bytes::from_static(&OPUS_SILENCE)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Silent microphone stopped");
        });

        tracing::info!("Using silent microphone (built without audio-device support)");
        Ok(Microphone::new(rx, CaptureGuard::new(stop_tx)))
    }

    fn speaker(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }
}

/// Counts and drops remote audio
#[derive(Default)]
pub struct DiscardSink {
    packets: AtomicU64,
}

impl DiscardSink {
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

impl AudioSink for DiscardSink {
    fn play(&self, _packet: &[u8]) {
        let count = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 500 == 1 {
            tracing::trace!(packets = count, "Discarding remote audio");
        }
    }
}

/// Pick the devices this build supports
pub fn default_devices() -> Arc<dyn MediaDevices> {
    #[cfg(feature = "audio-device")]
    {
        match device::CpalDevices::new() {
            Ok(devices) => return Arc::new(devices),
            Err(e) => {
                tracing::warn!("Audio devices unavailable, falling back to silence: {}", e);
            }
        }
    }

    Arc::new(SilentDevices::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_samples() {
        assert_eq!(FRAME_SAMPLES, 960);
    }

    #[tokio::test]
    async fn test_silent_microphone_produces_frames_until_stopped() {
        let devices = SilentDevices::new();
        let (mut frames, guard) = devices.open_microphone().await.unwrap().into_parts();

        let frame = frames.recv().await.unwrap();
        assert_eq!(&frame[..], &OPUS_SILENCE);

        guard.stop();
        // Drain anything buffered; the channel must close once capture stops
        while frames.recv().await.is_some() {}
    }

    #[test]
    fn test_discard_sink_counts_packets() {
        let devices = SilentDevices::new();
        let speaker = devices.speaker();
        speaker.play(&[1, 2, 3]);
        speaker.play(&[4]);
        assert_eq!(devices.packets_received(), 2);
    }
}
