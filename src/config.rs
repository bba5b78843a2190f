use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::hub::{HubConfig, RegisteredApp};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub relay: RelayConfig,
    #[serde(default)]
    pub nats: Option<NatsConfig>,
    /// TPAs allowed to connect, keyed by package name.
    #[serde(default)]
    pub apps: Vec<RegisteredApp>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Format of the raw PCM on the glasses binary channel.
#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Deserialize)]
pub struct NatsConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_max_chars_per_line")]
    pub max_chars_per_line: usize,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default = "default_max_final_transcripts")]
    pub max_final_transcripts: usize,
    #[serde(default = "default_max_display_history")]
    pub max_display_history: usize,
    #[serde(default = "default_max_transcript_segments")]
    pub max_transcript_segments: usize,
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_max_chars_per_line() -> usize {
    30
}

fn default_max_lines() -> usize {
    3
}

fn default_max_final_transcripts() -> usize {
    3
}

fn default_max_display_history() -> usize {
    100
}

fn default_max_transcript_segments() -> usize {
    100
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            handshake_timeout: Duration::from_millis(self.relay.handshake_timeout_ms),
            max_chars_per_line: self.relay.max_chars_per_line,
            max_lines: self.relay.max_lines,
            max_final_transcripts: self.relay.max_final_transcripts,
            max_display_history: self.relay.max_display_history,
            max_transcript_segments: self.relay.max_transcript_segments,
            audio_sample_rate: self.audio.sample_rate,
            audio_channels: self.audio.channels,
        }
    }
}
