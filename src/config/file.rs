//! TOML configuration file loading
//!
//! Supports `~/.config/salin/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SalinConfigFile {
    /// Remote live session settings
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Microphone capture and conditioning
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speaker output
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Wake word listening
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket endpoint
    pub url: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Aoede")
    pub voice: Option<String>,

    /// System instruction text sent at session open
    pub system_instruction: Option<String>,

    /// API key (prefer the environment)
    pub api_key: Option<String>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,

    /// High-pass cutoff; `0` disables the stage
    pub high_pass_hz: Option<f32>,

    /// Presence peak centre; `0` disables the stage
    pub presence_hz: Option<f32>,
    pub presence_gain_db: Option<f32>,

    /// Low-pass cutoff; `0` disables the stage
    pub low_pass_hz: Option<f32>,

    /// Enable the dynamics compressor
    pub compressor: Option<bool>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Trigger phrases (e.g. `["salin", "hey salin"]`)
    pub phrases: Option<Vec<String>>,

    /// STT provider for the recognizer ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: Option<String>,
}

/// Session lifecycle configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Seconds spent in the sleep phase before returning to idle
    pub sleep_delay_secs: Option<u64>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config_file(content: &str) -> Result<SalinConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `SalinConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SalinConfigFile {
    let Some(path) = config_file_path() else {
        return SalinConfigFile::default();
    };

    if !path.exists() {
        return SalinConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SalinConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SalinConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/salin/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("salin").join("config.toml"))
}
