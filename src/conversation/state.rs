//! Externally observable conversation state

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Error;

/// Lifecycle phase of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Idle,
    /// Listening for a wake word
    Standby,
    Connecting,
    Listening,
    Speaking,
    /// Reserved; the client never retries on its own
    Reconnecting,
    /// Courtesy pause before returning to idle
    Sleep,
    Error,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Standby => "STANDBY",
            Self::Connecting => "CONNECTING",
            Self::Listening => "LISTENING",
            Self::Speaking => "SPEAKING",
            Self::Reconnecting => "RECONNECTING",
            Self::Sleep => "SLEEP",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse emotional tone, set by the remote through the mood tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Sad,
    Surprised,
    Angry,
    Thinking,
    Excited,
    Confused,
}

impl Mood {
    /// Every mood, in declaration order
    pub const ALL: [Self; 8] = [
        Self::Neutral,
        Self::Happy,
        Self::Sad,
        Self::Surprised,
        Self::Angry,
        Self::Thinking,
        Self::Excited,
        Self::Confused,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "NEUTRAL",
            Self::Happy => "HAPPY",
            Self::Sad => "SAD",
            Self::Surprised => "SURPRISED",
            Self::Angry => "ANGRY",
            Self::Thinking => "THINKING",
            Self::Excited => "EXCITED",
            Self::Confused => "CONFUSED",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::Config(format!("unknown mood: {s}")))
    }
}

/// Who spoke a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Remote,
}

/// One line of conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub mood: Mood,
}

/// Everything a presentation layer may read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub mood: Mood,
    pub transcript: Vec<TranscriptEntry>,
    pub error: Option<String>,
}
