//! Speech-to-text (STT) for wake word recognition

use std::str::FromStr;

use crate::config::SttConfig;
use crate::{Error, Result};

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text
#[derive(Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create an STT client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &SttConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config(format!(
                "{:?} API key required for wake word recognition",
                config.provider
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            provider: config.provider,
        })
    }

    /// Configured provider
    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let body = response.text().await?;
        let transcript = parse_whisper(&body).inspect_err(|e| {
            tracing::error!(error = %e, "failed to parse Whisper response");
        })?;

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let body = response.text().await?;
        let transcript = parse_deepgram(&body).inspect_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
        })?;

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

fn parse_whisper(body: &str) -> Result<String> {
    let result: WhisperResponse = serde_json::from_str(body)?;
    Ok(result.text)
}

/// First alternative of the first channel; empty when nothing was heard
fn parse_deepgram(body: &str) -> Result<String> {
    let result: DeepgramResponse = serde_json::from_str(body)?;
    Ok(result
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse() {
        assert_eq!("whisper".parse::<SttProvider>().unwrap(), SttProvider::Whisper);
        assert_eq!(" OpenAI ".parse::<SttProvider>().unwrap(), SttProvider::Whisper);
        assert_eq!("Deepgram".parse::<SttProvider>().unwrap(), SttProvider::Deepgram);
        assert!("vosk".parse::<SttProvider>().is_err());
    }

    #[test]
    fn empty_key_is_rejected() {
        let config = SttConfig {
            provider: SttProvider::Whisper,
            model: "whisper-1".to_string(),
            api_key: String::new(),
        };
        assert!(SpeechToText::new(&config).is_err());
    }

    #[test]
    fn whisper_text_is_extracted() {
        let text = parse_whisper(r#"{"text": "hey salin", "language": "en"}"#).unwrap();
        assert_eq!(text, "hey salin");

        assert!(matches!(parse_whisper("{}"), Err(Error::Serialization(_))));
        assert!(parse_whisper("<html>").is_err());
    }

    #[test]
    fn deepgram_takes_first_alternative() {
        let body = r#"{"metadata": {}, "results": {"channels": [
            {"alternatives": [{"transcript": "hey salin", "confidence": 0.98},
                              {"transcript": "hey sally", "confidence": 0.4}]},
            {"alternatives": [{"transcript": "ignored"}]}
        ]}}"#;
        assert_eq!(parse_deepgram(body).unwrap(), "hey salin");
    }

    #[test]
    fn deepgram_without_alternatives_is_empty() {
        let empty = parse_deepgram(r#"{"results": {"channels": []}}"#).unwrap();
        assert!(empty.is_empty());

        let silent = parse_deepgram(r#"{"results": {"channels": [{"alternatives": []}]}}"#);
        assert!(silent.unwrap().is_empty());

        assert!(parse_deepgram(r#"{"transcript": "x"}"#).is_err());
    }
}
