use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Stream types a TPA can subscribe to.
///
/// The concrete types form a fixed enumeration; `Wildcard` (`"*"`) and `All`
/// are stored as-is in subscription sets and expanded only at routing time,
/// so adding a concrete type later can't leave stale expansions behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    ButtonPress,
    HeadPosition,
    PhoneNotifications,
    OpenDashboard,
    AudioChunk,
    Video,
    Transcription,
    Translation,
    #[serde(rename = "*")]
    Wildcard,
    All,
}

impl StreamType {
    /// All concrete (non-wildcard) stream types.
    pub const CONCRETE: [StreamType; 8] = [
        StreamType::ButtonPress,
        StreamType::HeadPosition,
        StreamType::PhoneNotifications,
        StreamType::OpenDashboard,
        StreamType::AudioChunk,
        StreamType::Video,
        StreamType::Transcription,
        StreamType::Translation,
    ];

    pub fn is_wildcard(&self) -> bool {
        matches!(self, StreamType::Wildcard | StreamType::All)
    }

    /// Whether this stream carries media that requires the microphone.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            StreamType::AudioChunk | StreamType::Transcription | StreamType::Translation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::ButtonPress => "button_press",
            StreamType::HeadPosition => "head_position",
            StreamType::PhoneNotifications => "phone_notifications",
            StreamType::OpenDashboard => "open_dashboard",
            StreamType::AudioChunk => "audio_chunk",
            StreamType::Video => "video",
            StreamType::Transcription => "transcription",
            StreamType::Translation => "translation",
            StreamType::Wildcard => "*",
            StreamType::All => "all",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "button_press" => Ok(StreamType::ButtonPress),
            "head_position" => Ok(StreamType::HeadPosition),
            "phone_notifications" => Ok(StreamType::PhoneNotifications),
            "open_dashboard" => Ok(StreamType::OpenDashboard),
            "audio_chunk" => Ok(StreamType::AudioChunk),
            "video" => Ok(StreamType::Video),
            "transcription" => Ok(StreamType::Transcription),
            "translation" => Ok(StreamType::Translation),
            "*" => Ok(StreamType::Wildcard),
            "all" => Ok(StreamType::All),
            other => Err(RelayError::InvalidSubscriptionToken(other.to_string())),
        }
    }
}
