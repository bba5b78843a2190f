use serde::{Deserialize, Serialize};

/// Audio frame published to the STT service.
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    /// Base64-encoded raw PCM.
    pub pcm: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// RFC3339 timestamp.
    pub timestamp: String,
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Transcript event received from the STT service.
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub text: String,
    pub partial: bool,
    pub timestamp: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}
