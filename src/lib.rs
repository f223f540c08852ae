//! Salin - real-time voice-to-voice translation client
//!
//! This library provides the core of the Salin client:
//! - Microphone capture, conditioning and PCM framing
//! - Gapless scheduled playback of translated speech
//! - A duplex session transport to a live speech service
//! - The conversation state machine and wake word activation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Presentation (CLI)                  │
//! │        commands in  │  phase/mood/transcript out     │
//! └────────────────────┬────────────────────────────────┘
//!                      │ events
//! ┌────────────────────▼────────────────────────────────┐
//! │              Conversation Machine                    │
//! │   Session  │  Mood  │  Transcript  │  Wake Word     │
//! └──────┬─────────────┬───────────────────┬────────────┘
//!        │             │                   │
//! ┌──────▼──────┐ ┌────▼────────┐ ┌────────▼───────────┐
//! │   Capture   │ │  Transport  │ │  Playback Scheduler │
//! │ mic → PCM   │ │  WebSocket  │ │  PCM → speaker      │
//! └─────────────┘ └─────────────┘ └────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use conversation::{Command, ConversationMachine, Event, Mood, Phase, Snapshot};
pub use error::{Error, Result};
pub use transport::{Connector, LiveConnector, Transport, TransportEvent};
