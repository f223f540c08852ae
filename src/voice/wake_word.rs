//! Wake word detection
//!
//! A speech recognizer runs continuously while the client is in standby.
//! Each final result is checked for one of the trigger phrases; a match stops
//! the recognizer and reports the trigger. When the recognizer ends or fails
//! it is restarted, since platform recognizers time out after short silences.

use std::sync::Arc;

use crate::{Error, Result};

/// Event produced by a speech recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Recognized text; `is_final` is false for interim hypotheses
    Result { text: String, is_final: bool },
    /// Recognizer stopped on its own (end of stream, timeout)
    Ended,
    /// Recognizer failed
    Error(String),
}

/// Receives recognizer events, possibly from another thread
pub trait RecognizerSink: Send + Sync {
    fn on_event(&self, event: RecognizerEvent);
}

/// A restartable continuous speech recognizer
pub trait Recognizer {
    /// Begin listening, delivering events to `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot start (no microphone, etc)
    fn start(&mut self, sink: Arc<dyn RecognizerSink>) -> Result<()>;

    /// Stop listening; must be safe to call when already stopped
    fn stop(&mut self);
}

/// Matches recognized text against trigger phrases
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_words: Vec<String>,
}

impl WakeWordDetector {
    /// Create a new wake word detector
    ///
    /// # Arguments
    ///
    /// * `wake_words` - Trigger phrases to detect (e.g., "hey salin")
    ///
    /// # Errors
    ///
    /// Returns error if no non-empty phrase is given
    pub fn new(wake_words: Vec<String>) -> Result<Self> {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.to_lowercase().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::WakeWord("no wake phrases configured".to_string()));
        }

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Ok(Self {
            wake_words: normalized,
        })
    }

    /// Return the first trigger phrase contained in `transcript`
    #[must_use]
    pub fn matched_phrase(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();
        self.wake_words
            .iter()
            .find(|w| normalized.contains(w.as_str()))
            .map(String::as_str)
    }

    /// Check if transcribed text contains a wake word
    #[must_use]
    pub fn check_wake_word(&self, transcript: &str) -> bool {
        self.matched_phrase(transcript).is_some()
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

/// What the listen loop did with a recognizer event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// A trigger phrase was heard; the recognizer has been stopped
    Triggered(String),
    /// The recognizer ended or failed and was started again
    Restarted,
    /// Nothing to do; the recognizer keeps running
    Continue,
}

/// Continuous, self-healing wake word listen loop
pub struct WakeWordListener {
    detector: WakeWordDetector,
    recognizer: Box<dyn Recognizer>,
    sink: Option<Arc<dyn RecognizerSink>>,
}

impl WakeWordListener {
    /// Create a listener around a recognizer
    #[must_use]
    pub fn new(detector: WakeWordDetector, recognizer: Box<dyn Recognizer>) -> Self {
        Self {
            detector,
            recognizer,
            sink: None,
        }
    }

    /// Start listening; a no-op if already listening
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot start
    pub fn begin(&mut self, sink: Arc<dyn RecognizerSink>) -> Result<()> {
        if self.sink.is_some() {
            return Ok(());
        }
        self.recognizer.start(Arc::clone(&sink))?;
        self.sink = Some(sink);
        tracing::info!(wake_words = ?self.detector.wake_words(), "listening for wake word");
        Ok(())
    }

    /// Stop listening; a no-op if not listening
    pub fn end(&mut self) {
        if self.sink.take().is_some() {
            self.recognizer.stop();
            tracing::debug!("wake word listening stopped");
        }
    }

    /// True while the recognizer loop is active
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.sink.is_some()
    }

    /// Process a recognizer event
    ///
    /// # Errors
    ///
    /// Returns error if a restart fails
    pub fn handle(&mut self, event: RecognizerEvent) -> Result<WakeOutcome> {
        let Some(sink) = self.sink.clone() else {
            return Ok(WakeOutcome::Continue);
        };

        match event {
            RecognizerEvent::Result {
                text,
                is_final: true,
            } => {
                let Some(phrase) = self.detector.matched_phrase(&text).map(ToString::to_string)
                else {
                    tracing::debug!(transcript = %text, "no wake word");
                    return Ok(WakeOutcome::Continue);
                };
                tracing::info!(wake_word = %phrase, transcript = %text, "wake word detected");
                self.end();
                Ok(WakeOutcome::Triggered(phrase))
            }
            RecognizerEvent::Result { .. } => Ok(WakeOutcome::Continue),
            RecognizerEvent::Ended => {
                tracing::debug!("recognizer ended, restarting");
                self.restart(sink)
            }
            RecognizerEvent::Error(message) => {
                tracing::warn!(error = %message, "recognizer error, restarting");
                self.restart(sink)
            }
        }
    }

    fn restart(&mut self, sink: Arc<dyn RecognizerSink>) -> Result<WakeOutcome> {
        self.recognizer.stop();
        if let Err(e) = self.recognizer.start(sink) {
            self.sink = None;
            return Err(e);
        }
        Ok(WakeOutcome::Restarted)
    }
}
