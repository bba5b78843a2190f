//! NATS transport to the STT service: audio frames out on
//! `audio.frame.<session_id>`, transcript events in on `stt.text.>`.

pub mod client;
pub mod messages;

pub use client::NatsClient;
pub use messages::{AudioFrameMessage, TranscriptMessage};

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::hub::SessionHub;

/// Spawns the transcript pump: every STT event is routed to its session's
/// processor and fanned out to subscribers. Runs until the subscription
/// closes.
pub fn spawn_stt_task(hub: Arc<SessionHub>, nats: Arc<NatsClient>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut subscriber = match nats.subscribe_transcripts().await {
            Ok(subscriber) => subscriber,
            Err(err) => {
                error!(%err, "failed to subscribe to transcripts");
                return;
            }
        };

        while let Some(message) = subscriber.next().await {
            match serde_json::from_slice::<TranscriptMessage>(&message.payload) {
                Ok(transcript) => {
                    hub.handle_transcription(
                        &transcript.session_id,
                        &transcript.text,
                        !transcript.partial,
                        None,
                    )
                    .await;
                }
                Err(err) => warn!(%err, "malformed transcript message"),
            }
        }
    })
}
