//! Configuration management for Salin

pub mod file;

use std::time::Duration;

use crate::voice::SttProvider;
use crate::{Error, Result};

/// Default live session WebSocket endpoint
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Aoede";

/// Default trigger phrases for wake word listening
pub const DEFAULT_WAKE_PHRASES: &[&str] = &["salin", "hey salin"];

/// Default instruction for the remote model
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Salin, a live voice interpreter. \
Translate everything the user says into the other language of the conversation and speak \
only the translation, keeping the speaker's tone. Do not answer questions or add commentary. \
Whenever the emotional tone of the conversation changes, call setMood with the closest mood.";

/// Salin configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential for the live translation service
    pub api_key: Option<String>,

    /// Live session settings
    pub live: LiveConfig,

    /// Microphone capture settings
    pub capture: CaptureConfig,

    /// Speaker output settings
    pub playback: PlaybackConfig,

    /// Wake word settings
    pub wake: WakeConfig,

    /// Time spent in the sleep phase before returning to idle
    pub sleep_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            live: LiveConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            wake: WakeConfig::default(),
            sleep_delay: Duration::from_secs(5),
        }
    }
}

/// Live session configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// WebSocket endpoint
    pub url: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt synthetic voice
    pub voice: String,

    /// Instruction text sent once at session open
    pub system_instruction: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LIVE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device and pipeline sample rate (mono)
    pub sample_rate: u32,

    /// Samples per outbound frame
    pub frame_size: usize,

    /// Conditioning stages
    pub conditioning: ConditioningConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 512,
            conditioning: ConditioningConfig::default(),
        }
    }
}

/// Conditioning chain configuration; `None` disables a stage
#[derive(Debug, Clone)]
pub struct ConditioningConfig {
    pub high_pass_hz: Option<f32>,
    pub presence_hz: Option<f32>,
    pub presence_gain_db: f32,
    pub low_pass_hz: Option<f32>,
    pub compressor: Option<CompressorConfig>,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            high_pass_hz: Some(180.0),
            presence_hz: Some(2500.0),
            presence_gain_db: 3.0,
            low_pass_hz: Some(7000.0),
            compressor: Some(CompressorConfig::default()),
        }
    }
}

/// Dynamics compressor settings
#[derive(Debug, Clone, PartialEq)]
pub struct CompressorConfig {
    pub threshold_db: f32,
    pub ratio: f32,
    pub knee_db: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            ratio: 4.0,
            knee_db: 10.0,
            attack_secs: 0.003,
            release_secs: 0.25,
        }
    }
}

/// Speaker output configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate of inbound PCM audio
    pub sample_rate: u32,

    /// Channels of inbound PCM audio
    pub channels: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
        }
    }
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Trigger phrases, matched case-insensitively by containment
    pub phrases: Vec<String>,

    /// STT backend for the recognizer; `None` disables standby
    pub stt: Option<SttConfig>,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect(),
            stt: None,
        }
    }
}

/// STT backend configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    pub api_key: String,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration with priority env > toml > default
    ///
    /// # Errors
    ///
    /// Returns error if a setting is invalid
    pub fn resolve(
        fc: file::SalinConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("SALIN_API_KEY"))
            .or(fc.live.api_key)
            .filter(|k| !k.trim().is_empty());

        let defaults = LiveConfig::default();
        let live = LiveConfig {
            url: env("SALIN_LIVE_URL").or(fc.live.url).unwrap_or(defaults.url),
            model: env("SALIN_MODEL").or(fc.live.model).unwrap_or(defaults.model),
            voice: env("SALIN_VOICE").or(fc.live.voice).unwrap_or(defaults.voice),
            system_instruction: fc
                .live
                .system_instruction
                .unwrap_or(defaults.system_instruction),
        };

        let capture = Self::resolve_capture(&fc.capture)?;

        let playback = PlaybackConfig {
            sample_rate: fc.playback.sample_rate.unwrap_or(24_000),
            channels: fc.playback.channels.unwrap_or(1),
        };
        if playback.sample_rate == 0 || !(1..=2).contains(&playback.channels) {
            return Err(Error::Config(format!(
                "unsupported playback format: {} Hz, {} channels",
                playback.sample_rate, playback.channels
            )));
        }

        let wake = Self::resolve_wake(fc.wake, &env)?;

        let sleep_delay = Duration::from_secs(fc.session.sleep_delay_secs.unwrap_or(5));

        Ok(Self {
            api_key,
            live,
            capture,
            playback,
            wake,
            sleep_delay,
        })
    }

    fn resolve_capture(fc: &file::CaptureFileConfig) -> Result<CaptureConfig> {
        let defaults = CaptureConfig::default();
        let sample_rate = fc.sample_rate.unwrap_or(defaults.sample_rate);
        let frame_size = fc.frame_size.unwrap_or(defaults.frame_size);

        if sample_rate == 0 {
            return Err(Error::Config("capture sample rate must be non-zero".to_string()));
        }
        if !frame_size.is_power_of_two() || !(128..=16_384).contains(&frame_size) {
            return Err(Error::Config(format!(
                "capture frame size {frame_size} must be a power of two between 128 and 16384"
            )));
        }

        // Zero switches a stage off
        let stage = |value: Option<f32>, default: Option<f32>| match value {
            Some(hz) if hz <= 0.0 => None,
            Some(hz) => Some(hz),
            None => default,
        };
        let base = defaults.conditioning;
        let conditioning = ConditioningConfig {
            high_pass_hz: stage(fc.high_pass_hz, base.high_pass_hz),
            presence_hz: stage(fc.presence_hz, base.presence_hz),
            presence_gain_db: fc.presence_gain_db.unwrap_or(base.presence_gain_db),
            low_pass_hz: stage(fc.low_pass_hz, base.low_pass_hz),
            compressor: if fc.compressor.unwrap_or(true) {
                base.compressor
            } else {
                None
            },
        };

        Ok(CaptureConfig {
            sample_rate,
            frame_size,
            conditioning,
        })
    }

    fn resolve_wake(
        fc: file::WakeFileConfig,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<WakeConfig> {
        let phrases = fc.phrases.unwrap_or_else(|| {
            DEFAULT_WAKE_PHRASES.iter().map(ToString::to_string).collect()
        });

        let provider = match env("SALIN_STT_PROVIDER").or(fc.stt_provider) {
            Some(name) => name.parse::<SttProvider>()?,
            None => SttProvider::Whisper,
        };
        let (key_var, default_model) = match provider {
            SttProvider::Whisper => ("OPENAI_API_KEY", "whisper-1"),
            SttProvider::Deepgram => ("DEEPGRAM_API_KEY", "nova-2"),
        };
        let stt = env(key_var)
            .filter(|k| !k.trim().is_empty())
            .map(|api_key| SttConfig {
                provider,
                model: fc
                    .stt_model
                    .unwrap_or_else(|| default_model.to_string()),
                api_key,
            });

        Ok(WakeConfig { phrases, stt })
    }
}
