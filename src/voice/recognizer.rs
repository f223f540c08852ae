//! Continuous speech recognizer for wake word listening
//!
//! Local energy detection cuts the microphone stream into utterances; each
//! utterance is sent to a cloud STT provider and the transcript is reported
//! as a final result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::stt::SpeechToText;
use super::wake_word::{Recognizer, RecognizerEvent, RecognizerSink};
use crate::Result;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to transcribe (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// How often the capture buffer is drained
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Splits a sample stream into utterances bounded by silence
#[derive(Debug, Default)]
pub struct SpeechSegmenter {
    in_speech: bool,
    segment: Vec<f32>,
    speech: usize,
    silence: usize,
}

impl SpeechSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed samples; returns a finished utterance once speech is followed by silence
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.segment.clear();
                self.segment.extend_from_slice(samples);
                self.speech = samples.len();
                self.silence = 0;
                tracing::trace!(energy, "speech detected");
            }
            return None;
        }

        self.segment.extend_from_slice(samples);
        if is_speech {
            self.speech += samples.len();
            self.silence = 0;
        } else {
            self.silence += samples.len();
        }

        if self.silence > SILENCE_SAMPLES && self.speech > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.segment.len(), "speech segment complete");
            let segment = std::mem::take(&mut self.segment);
            self.reset();
            return Some(segment);
        }

        // Too much silence without enough speech
        if self.silence > SILENCE_SAMPLES * 2 {
            tracing::trace!("segment timeout, resetting");
            self.reset();
        }

        None
    }

    /// True while an utterance is being accumulated
    #[must_use]
    pub const fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.segment.clear();
        self.speech = 0;
        self.silence = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Microphone + energy segmentation + cloud STT
pub struct SegmentingRecognizer {
    stt: SpeechToText,
    capture: Option<AudioCapture>,
    task: Option<JoinHandle<()>>,
}

impl SegmentingRecognizer {
    #[must_use]
    pub const fn new(stt: SpeechToText) -> Self {
        Self {
            stt,
            capture: None,
            task: None,
        }
    }
}

impl Recognizer for SegmentingRecognizer {
    fn start(&mut self, sink: Arc<dyn RecognizerSink>) -> Result<()> {
        self.stop();

        let mut capture = AudioCapture::new()?;
        capture.start()?;
        let buffer = capture.buffer_handle();

        self.task = Some(tokio::spawn(listen(buffer, self.stt.clone(), sink)));
        self.capture = Some(capture);

        tracing::debug!(provider = ?self.stt.provider(), "recognizer started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
    }
}

impl Drop for SegmentingRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn listen(buffer: Arc<Mutex<Vec<f32>>>, stt: SpeechToText, sink: Arc<dyn RecognizerSink>) {
    let mut segmenter = SpeechSegmenter::new();
    let mut interval = tokio::time::interval(POLL_INTERVAL);

    loop {
        interval.tick().await;

        let chunk = match buffer.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(_) => {
                sink.on_event(RecognizerEvent::Error("capture buffer poisoned".to_string()));
                return;
            }
        };
        if chunk.is_empty() {
            continue;
        }

        let Some(segment) = segmenter.push(&chunk) else {
            continue;
        };

        let transcript = match samples_to_wav(&segment, SAMPLE_RATE) {
            Ok(wav) => stt.transcribe(&wav).await,
            Err(e) => Err(e),
        };

        match transcript {
            Ok(text) => {
                tracing::debug!(transcript = %text, "utterance transcribed");
                sink.on_event(RecognizerEvent::Result {
                    text,
                    is_final: true,
                });
            }
            Err(e) => {
                sink.on_event(RecognizerEvent::Error(e.to_string()));
                return;
            }
        }
    }
}
