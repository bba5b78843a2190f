//! Transcription processing: bounded, line-wrapped display text from
//! interim/final speech events, plus the finalized segment record kept in
//! each session's rolling history.

mod processor;

pub use processor::TranscriptProcessor;

use serde::{Deserialize, Serialize};

/// A single speech segment as received from the STT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Transcribed text.
    pub text: String,

    /// Whether this segment was finalized by the recognizer.
    pub is_final: bool,

    /// Start of the segment, milliseconds from session start.
    pub start_time: i64,

    /// End of the segment, milliseconds from session start.
    pub end_time: i64,

    /// Speaker identifier, if diarization is enabled upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}
