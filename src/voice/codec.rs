//! PCM codec for the live session wire format
//!
//! Outgoing frames are 16-bit little-endian PCM wrapped in base64. Incoming
//! audio arrives the same way and is rebuilt into planar float buffers.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Bytes per 16-bit PCM sample
const BYTES_PER_SAMPLE: usize = 2;

/// Quantize float samples to 16-bit PCM and base64-encode the result
///
/// Out-of-range input is clamped to [-1, 1] rather than wrapping.
#[must_use]
pub fn encode_frame(samples: &[f32]) -> String {
    STANDARD.encode(samples_to_pcm16(samples))
}

/// Decode a base64 payload into raw PCM bytes
///
/// # Errors
///
/// Returns `Error::Decode` if the payload is not valid base64
pub fn decode_frame(payload: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload)
        .map_err(|e| Error::Decode(e.to_string()))
}

/// Convert float samples to little-endian 16-bit PCM bytes
#[must_use]
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    bytes
}

/// Interpret little-endian 16-bit PCM bytes as normalized float samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| normalize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled.round().clamp(-32768.0, 32767.0) as i16
}

fn normalize(value: i16) -> f32 {
    if value < 0 {
        f32::from(value) / 32768.0
    } else {
        f32::from(value) / 32767.0
    }
}

/// Planar float audio tagged with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a buffer from planar channel data
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` if there are no channels or their lengths differ
    pub fn from_planar(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = channels.first() else {
            return Err(Error::Format("buffer needs at least one channel".to_string()));
        };
        let frames = first.len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(Error::Format("channel lengths differ".to_string()));
        }
        if sample_rate == 0 {
            return Err(Error::Format("sample rate must be non-zero".to_string()));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Build a mono buffer
    ///
    /// # Errors
    ///
    /// Returns `Error::Format` if the sample rate is zero
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self> {
        Self::from_planar(sample_rate, vec![samples])
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames per channel
    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// True if the buffer holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Average all channels into one
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn downmix(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            all => {
                let count = all.len() as f32;
                (0..self.frames())
                    .map(|i| all.iter().map(|c| c[i]).sum::<f32>() / count)
                    .collect()
            }
        }
    }
}

/// Rebuild a playable buffer from interleaved 16-bit PCM bytes
///
/// Zero-length input yields a zero-duration buffer; callers treat it as a no-op.
///
/// # Errors
///
/// Returns `Error::Format` if the byte length is not a multiple of
/// `2 * channel_count`, or if the channel count or sample rate is zero
pub fn build_playable_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<AudioBuffer> {
    if channel_count == 0 {
        return Err(Error::Format("channel count must be non-zero".to_string()));
    }
    let channels = usize::from(channel_count);
    let frame_bytes = BYTES_PER_SAMPLE * channels;
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::Format(format!(
            "{} bytes is not a multiple of {frame_bytes}",
            bytes.len()
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for (i, sample) in pcm16_to_samples(bytes).into_iter().enumerate() {
        planar[i % channels].push(sample);
    }

    AudioBuffer::from_planar(sample_rate, planar)
}
