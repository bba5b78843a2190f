//! The session hub: central coordinator between glasses transports, TPA
//! transports, the subscription registry, the display arbitrator, and the
//! STT service.

mod hub;
mod webhook;

pub use hub::{HubConfig, SessionHub};
pub use webhook::{RegisteredApp, WebhookClient};
