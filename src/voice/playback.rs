//! Audio playback to speakers
//!
//! Incoming audio chunks are decoded and scheduled back to back on the
//! output clock so consecutive chunks play gaplessly. The scheduler keeps the
//! set of in-flight handles so an interruption can cut all of them at once.

use std::collections::BTreeSet;
use std::mem;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::backend::{HandleId, OutputDevice};
use super::codec::{AudioBuffer, build_playable_buffer, decode_frame};
use crate::config::PlaybackConfig;
use crate::{Error, Result};

/// Hears about buffers that played to their natural end
///
/// Called from the audio thread; implementations must not block.
pub trait PlaybackListener: Send + Sync {
    fn on_ended(&self, handle: HandleId);
}

/// Where a chunk landed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub handle: HandleId,
    pub start: f64,
    pub duration: f64,
}

/// Gapless scheduler over an output device
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    sample_rate: u32,
    channels: u16,
    cursor: f64,
    active: BTreeSet<HandleId>,
    next_handle: HandleId,
}

impl PlaybackScheduler {
    /// Wrap an opened output device
    #[must_use]
    pub fn new(device: Box<dyn OutputDevice>, config: &PlaybackConfig) -> Self {
        Self {
            device,
            sample_rate: config.sample_rate,
            channels: config.channels,
            cursor: 0.0,
            active: BTreeSet::new(),
            next_handle: 1,
        }
    }

    /// Start the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to start
    pub fn resume(&mut self) -> Result<()> {
        self.device.resume()
    }

    /// Decode a base64 PCM chunk and schedule it
    ///
    /// Returns `None` for an empty chunk.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` or `Error::Format` for a malformed chunk; the
    /// schedule is left untouched
    pub fn enqueue(&mut self, payload: &str) -> Result<Option<ScheduledPlayback>> {
        let bytes = decode_frame(payload)?;
        let buffer = build_playable_buffer(&bytes, self.sample_rate, self.channels)?;
        if buffer.is_empty() {
            return Ok(None);
        }
        self.schedule(buffer).map(Some)
    }

    /// Schedule a buffer right after everything already queued
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the buffer
    pub fn schedule(&mut self, buffer: AudioBuffer) -> Result<ScheduledPlayback> {
        let requested = self.cursor.max(self.device.current_time());
        let duration = buffer.duration();
        let handle = self.next_handle;

        // The clock may move between reading it and starting the buffer
        let start = self.device.start(handle, buffer, requested)?;
        self.next_handle += 1;
        self.active.insert(handle);
        self.cursor = start + duration;

        tracing::trace!(handle, start, duration, "chunk scheduled");
        Ok(ScheduledPlayback {
            handle,
            start,
            duration,
        })
    }

    /// Record that `handle` finished; true if that drained the queue
    pub fn complete(&mut self, handle: HandleId) -> bool {
        self.active.remove(&handle) && self.active.is_empty()
    }

    /// Stop everything in flight and rewind the cursor
    pub fn interrupt(&mut self) {
        let stopped = mem::take(&mut self.active);
        for handle in &stopped {
            self.device.stop(*handle);
        }
        self.cursor = 0.0;
        if !stopped.is_empty() {
            tracing::debug!(stopped = stopped.len(), "playback interrupted");
        }
    }

    /// Release the device, then stop every handle still registered
    ///
    /// Handles are cleared even if the device fails to close.
    ///
    /// # Errors
    ///
    /// Returns error if the device fails to close
    pub fn close(&mut self) -> Result<()> {
        let closed = self.device.close();
        self.interrupt();
        closed
    }

    /// True when nothing is scheduled or playing
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.active.is_empty()
    }

    /// Number of scheduled or playing chunks
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Device time at which the next chunk would start
    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.cursor
    }
}

struct Voice {
    handle: HandleId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled voices into the output stream, advancing a frame clock
struct Mixer {
    sample_rate: u32,
    clock: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: 0,
            voices: Vec::new(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.clock as f64 / f64::from(self.sample_rate)
    }

    /// Queue a voice no earlier than the current frame; returns its start time
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn add(&mut self, handle: HandleId, samples: Vec<f32>, at: f64) -> f64 {
        let requested = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let start_frame = requested.max(self.clock);
        self.voices.push(Voice {
            handle,
            start_frame,
            samples,
        });
        start_frame as f64 / f64::from(self.sample_rate)
    }

    fn remove(&mut self, handle: HandleId) {
        self.voices.retain(|v| v.handle != handle);
    }

    /// Fill an interleaved block; returns handles that finished within it
    fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<HandleId> {
        let channels = channels.max(1);
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.clock + i as u64;
            let mut sample = 0.0;
            for voice in &self.voices {
                if t >= voice.start_frame && t < voice.end_frame() {
                    #[allow(clippy::cast_possible_truncation)]
                    let offset = (t - voice.start_frame) as usize;
                    sample += voice.samples[offset];
                }
            }
            frame.fill(sample.clamp(-1.0, 1.0));
        }
        self.clock += (out.len() / channels) as u64;

        let clock = self.clock;
        let mut ended = Vec::new();
        self.voices.retain(|v| {
            let done = v.end_frame() <= clock;
            if done {
                ended.push(v.handle);
            }
            !done
        });
        ended
    }
}

/// Speaker stream on the default output device
pub struct CpalOutput {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
}

impl CpalOutput {
    /// Open the default speaker at the playback rate
    ///
    /// Prefers the configured channel count and falls back to the other one.
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the playback rate
    pub fn open(config: &PlaybackConfig, listener: Arc<dyn PlaybackListener>) -> Result<Self> {
        let rate = config.sample_rate;
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let fits = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(rate)
                    && c.max_sample_rate() >= SampleRate(rate)
            })
        };
        let fallback = if config.channels == 1 { 2 } else { 1 };
        let supported_config = fits(config.channels)
            .or_else(|| fits(fallback))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let stream_config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(rate))
            .config();
        let channels = usize::from(stream_config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = rate,
            channels,
            "audio output selected"
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(rate)));
        let render_mixer = Arc::clone(&mixer);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let ended = match render_mixer.lock() {
                        Ok(mut mixer) => mixer.render(data, channels),
                        Err(_) => {
                            data.fill(0.0);
                            Vec::new()
                        }
                    };
                    for handle in ended {
                        listener.on_ended(handle);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            mixer,
            sample_rate: rate,
        })
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.current_time())
    }

    fn resume(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Audio("speaker stream already closed".to_string()))?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))
    }

    fn start(&mut self, handle: HandleId, buffer: AudioBuffer, at: f64) -> Result<f64> {
        if self.stream.is_none() {
            return Err(Error::Audio("speaker stream already closed".to_string()));
        }
        if buffer.sample_rate() != self.sample_rate {
            return Err(Error::Format(format!(
                "buffer rate {} does not match output rate {}",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }
        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("playback mixer poisoned".to_string()))?;
        Ok(mixer.add(handle, buffer.downmix(), at))
    }

    fn stop(&mut self, handle: HandleId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(handle);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.voices.clear();
            }
            tracing::debug!("speaker stream closed");
            paused.map_err(|e| Error::Audio(e.to_string()))?;
        }
        Ok(())
    }
}
