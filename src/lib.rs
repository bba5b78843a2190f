pub mod config;
pub mod display;
pub mod error;
pub mod http;
pub mod hub;
pub mod nats;
pub mod proto;
pub mod session;
pub mod subscription;
pub mod transcript;

pub use config::Config;
pub use display::{DisplayArbitrator, DisplayPriority, DisplayRecord};
pub use error::RelayError;
pub use http::{create_router, AppState};
pub use hub::{HubConfig, RegisteredApp, SessionHub, WebhookClient};
pub use nats::{spawn_stt_task, AudioFrameMessage, NatsClient, TranscriptMessage};
pub use proto::{
    AppStatus, CloudToGlassesMessage, CloudToTpaMessage, GlassesMessage, Layout, StreamType,
    TpaMessage, TranscriptionData, WebhookRequest, WebhookResponse, WebhookStatus,
};
pub use session::{AppSessionState, SessionSummary};
pub use subscription::{SubscriptionAction, SubscriptionChange, SubscriptionRegistry};
pub use transcript::{TranscriptProcessor, TranscriptSegment};
