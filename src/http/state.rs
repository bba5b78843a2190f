use std::sync::Arc;

use crate::hub::SessionHub;

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SessionHub>,
}

impl AppState {
    pub fn new(hub: Arc<SessionHub>) -> Self {
        Self { hub }
    }
}
