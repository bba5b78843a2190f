//! Wire protocol types for the glasses channel, the TPA channel, and the
//! TPA webhook. All frames are JSON text tagged by `type`; the glasses
//! channel additionally carries raw binary audio frames with no envelope.

mod glasses;
mod layout;
mod stream;
mod tpa;

pub use glasses::{AppStatus, CloudToGlassesMessage, GlassesMessage};
pub use layout::Layout;
pub use stream::StreamType;
pub use tpa::{
    CloudToTpaMessage, TpaMessage, TranscriptionData, WebhookRequest, WebhookResponse,
    WebhookStatus,
};
