use anyhow::{Context, Result};
use async_nats::Client;
use base64::Engine;
use tracing::{debug, info};

pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Publish one audio frame for a session to the STT service
    pub async fn publish_audio_frame(
        &self,
        session_id: &str,
        pcm_bytes: &[u8],
        sample_rate: u32,
        channels: u16,
        sequence: u32,
        is_final: bool,
    ) -> Result<()> {
        let subject = format!("audio.frame.{}", session_id);

        let message = super::messages::AudioFrameMessage {
            session_id: session_id.to_string(),
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            sample_rate,
            channels,
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame: is_final,
        };

        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish audio frame")?;

        debug!(
            "Published audio frame to {} (seq={}, bytes={}, final={})",
            subject,
            sequence,
            pcm_bytes.len(),
            is_final
        );

        Ok(())
    }

    /// Subscribe to transcript messages for all sessions
    pub async fn subscribe_transcripts(&self) -> Result<async_nats::Subscriber> {
        // The STT service publishes to stt.text.partial and stt.text.final;
        // frames are routed to sessions by the session_id in the payload.
        let subject = "stt.text.>";

        info!("Subscribing to transcripts on {}", subject);

        let subscriber = self
            .client
            .subscribe(subject)
            .await
            .context("Failed to subscribe to transcripts")?;

        Ok(subscriber)
    }
}
