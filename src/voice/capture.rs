//! Audio capture from microphone
//!
//! Two capture paths share the same device selection:
//! - [`AudioCapture`] accumulates raw samples in a buffer (wake word
//!   recognizer, microphone test)
//! - [`CpalInput`] runs every callback block through a [`FrameProcessor`]
//!   that conditions, packetizes and streams frames to the live session

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::backend::InputDevice;
use super::codec::encode_frame;
use super::conditioning::ConditioningChain;
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Open the default input device with a mono config at `sample_rate`
fn default_input(sample_rate: u32) -> Result<(Device, StreamConfig)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio input selected"
    );

    Ok((device, config))
}

/// Captures audio from the default input device into a buffer
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let (device, config) = default_input(SAMPLE_RATE)?;

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Shared handle to the capture buffer
    #[must_use]
    pub fn buffer_handle(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.buffer)
    }

    /// Get captured audio buffer without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Destination for encoded outbound frames
///
/// Called from the audio callback; implementations must not block.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, payload: String);
}

/// Gate between the capture callback and the session transport
///
/// Frames are dropped until a sink is attached, and for good once the
/// session token is cancelled.
pub struct FrameTap {
    token: CancellationToken,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    frames_sent: AtomicU64,
}

impl FrameTap {
    /// Create a detached tap bound to a session token
    #[must_use]
    pub fn new(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token,
            sink: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
        })
    }

    /// Start streaming frames to `sink`
    pub fn attach(&self, sink: Arc<dyn FrameSink>) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
    }

    /// Stop streaming and release the sink
    pub fn detach(&self) {
        if let Ok(mut slot) = self.sink.lock() {
            slot.take();
        }
    }

    /// True while frames are being forwarded
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        !self.token.is_cancelled() && self.sink.lock().is_ok_and(|slot| slot.is_some())
    }

    /// Number of frames handed to the sink so far
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Encode and forward one frame; silently dropped while closing or detached
    pub fn forward(&self, frame: &[f32]) {
        if self.token.is_cancelled() {
            return;
        }
        let sink = match self.sink.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => return,
        };
        if let Some(sink) = sink {
            sink.send_frame(encode_frame(frame));
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Splits a continuous sample stream into fixed-size frames
#[derive(Debug, Clone)]
pub struct Packetizer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Packetizer {
    /// Create a packetizer emitting `frame_size` samples per frame
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append samples and return every complete frame, in order
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }
        let frames = self
            .pending
            .chunks_exact(self.frame_size)
            .map(<[f32]>::to_vec)
            .collect();
        self.pending.drain(..complete * self.frame_size);
        frames
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Per-callback capture work: condition, packetize, forward
pub struct FrameProcessor {
    chain: ConditioningChain,
    packetizer: Packetizer,
    tap: Arc<FrameTap>,
}

impl FrameProcessor {
    /// Build the processor for a capture configuration
    #[must_use]
    pub fn new(config: &CaptureConfig, tap: Arc<FrameTap>) -> Self {
        Self {
            chain: ConditioningChain::new(config.sample_rate, &config.conditioning),
            packetizer: Packetizer::new(config.frame_size),
            tap,
        }
    }

    /// Handle one block of captured samples
    pub fn process(&mut self, input: &[f32]) {
        let mut block = input.to_vec();
        self.chain.process(&mut block);
        for frame in self.packetizer.push(&block) {
            self.tap.forward(&frame);
        }
    }
}

/// Session microphone stream on the default input device
pub struct CpalInput {
    stream: Option<Stream>,
}

impl CpalInput {
    /// Open the default microphone and route its blocks through `processor`
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing, busy or lacks a mono config
    /// at the requested rate
    pub fn open(config: &CaptureConfig, mut processor: FrameProcessor) -> Result<Self> {
        let (device, stream_config) = default_input(config.sample_rate)?;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    processor.process(data);
                },
                |err| {
                    tracing::error!(error = %err, "microphone stream error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            sample_rate = config.sample_rate,
            frame_size = config.frame_size,
            "microphone stream opened"
        );

        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl InputDevice for CpalInput {
    fn resume(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Audio("microphone stream already closed".to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            tracing::debug!("microphone stream closed");
            paused.map_err(|e| Error::Audio(e.to_string()))?;
        }
        Ok(())
    }
}
