//! Hardware microphone and speaker through CPAL, encoded with Opus.
//!
//! CPAL streams are not `Send`, so each stream lives on its own thread and is
//! dropped when that thread is told to stop.

use super::{AudioSink, CaptureGuard, MediaDevices, Microphone, FRAME_SAMPLES, SAMPLE_RATE};
use crate::session::SessionError;
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Cap on buffered playback audio (2 s) so latency cannot grow without bound
const MAX_PLAYBACK_SAMPLES: usize = SAMPLE_RATE as usize * 2;

/// Largest Opus frame (120 ms) at 48 kHz
const MAX_DECODED_SAMPLES: usize = 5760;

pub struct CpalDevices {
    speaker: Arc<dyn AudioSink>,
    // Dropping the sender ends the playback thread
    _playback_stop: std::sync::mpsc::Sender<()>,
}

impl CpalDevices {
    pub fn new() -> anyhow::Result<Self> {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let speaker = CpalSpeaker::start(stop_rx)?;

        Ok(Self {
            speaker: Arc::new(speaker),
            _playback_stop: stop_tx,
        })
    }
}

fn find_config<I>(configs: I) -> Option<StreamConfig>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    configs
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .find(|c| c.min_sample_rate().0 <= SAMPLE_RATE && c.max_sample_rate().0 >= SAMPLE_RATE)
        .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)).config())
}

#[async_trait]
impl MediaDevices for CpalDevices {
    async fn open_microphone(&self) -> Result<Microphone, SessionError> {
        let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(64);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        std::thread::spawn(move || {
            let stream = match build_capture_stream(frame_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("failed to start input stream: {}", e)));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            // Either an explicit stop or the guard being dropped ends capture
            let _ = stop_rx.blocking_recv();
            drop(stream);
            debug!("Microphone capture stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Microphone::new(frame_rx, CaptureGuard::new(stop_tx))),
            Ok(Err(e)) => Err(SessionError::Media(e)),
            Err(_) => Err(SessionError::Media("capture thread exited".to_string())),
        }
    }

    fn speaker(&self) -> Arc<dyn AudioSink> {
        self.speaker.clone()
    }
}

fn build_capture_stream(frame_tx: mpsc::Sender<Bytes>) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "no input device available".to_string())?;

    let configs = device
        .supported_input_configs()
        .map_err(|e| format!("cannot query input device: {}", e))?;
    let config = find_config(configs)
        .ok_or_else(|| "input device does not support 48 kHz f32 capture".to_string())?;
    let channels = config.channels.max(1) as usize;

    info!(
        device = %device.name().unwrap_or_default(),
        channels, "Opening microphone"
    );

    let mut encoder =
        opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)
            .map_err(|e| format!("failed to create Opus encoder: {}", e))?;
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
    let mut packet = [0u8; 4000];

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Downmix to mono
                for frame in data.chunks(channels) {
                    let sample = frame.iter().sum::<f32>() / frame.len() as f32;
                    pending.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }

                while pending.len() >= FRAME_SAMPLES {
                    let chunk: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
                    match encoder.encode(&chunk, &mut packet) {
                        Ok(len) => {
                            if let Err(e) = frame_tx.try_send(Bytes::copy_from_slice(&packet[..len])) {
                                debug!("Dropping microphone frame: {}", e);
                            }
                        }
                        Err(e) => warn!("Opus encode error: {}", e),
                    }
                }
            },
            |err| error!("Audio capture error: {}", err),
            None,
        )
        .map_err(|e| format!("failed to open input stream: {}", e))
}

/// Decodes remote Opus packets into a buffer drained by the output stream
struct CpalSpeaker {
    decoder: Mutex<opus::Decoder>,
    buffer: Arc<Mutex<VecDeque<f32>>>,
}

impl CpalSpeaker {
    fn start(stop_rx: std::sync::mpsc::Receiver<()>) -> anyhow::Result<Self> {
        let buffer = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let playback = buffer.clone();
        std::thread::spawn(move || {
            let stream = match build_playback_stream(playback) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(format!("failed to start output stream: {}", e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            // Returns once the owning CpalDevices is dropped
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("playback thread exited"))?
            .map_err(|e| anyhow::anyhow!(e))?;

        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)?;
        Ok(Self {
            decoder: Mutex::new(decoder),
            buffer,
        })
    }
}

fn build_playback_stream(buffer: Arc<Mutex<VecDeque<f32>>>) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no output device available".to_string())?;

    let configs = device
        .supported_output_configs()
        .map_err(|e| format!("cannot query output device: {}", e))?;
    let config = find_config(configs)
        .ok_or_else(|| "output device does not support 48 kHz f32 playback".to_string())?;
    let channels = config.channels.max(1) as usize;

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut buffer = buffer.lock().unwrap();
                for frame in data.chunks_mut(channels) {
                    let sample = buffer.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| error!("Audio playback error: {}", err),
            None,
        )
        .map_err(|e| format!("failed to open output stream: {}", e))
}

impl AudioSink for CpalSpeaker {
    fn play(&self, packet: &[u8]) {
        let mut decoded = [0i16; MAX_DECODED_SAMPLES];
        let len = match self.decoder.lock().unwrap().decode(packet, &mut decoded, false) {
            Ok(len) => len,
            Err(e) => {
                warn!("Opus decode error: {}", e);
                return;
            }
        };

        let mut buffer = self.buffer.lock().unwrap();
        buffer.extend(decoded[..len].iter().map(|&s| s as f32 / i16::MAX as f32));
        if buffer.len() > MAX_PLAYBACK_SAMPLES {
            let excess = buffer.len() - MAX_PLAYBACK_SAMPLES;
            buffer.drain(..excess);
        }
    }
}
