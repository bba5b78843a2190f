use serde::{Deserialize, Serialize};

use super::Layout;

/// Control messages from the glasses client, tagged by `type`.
///
/// Hardware and phone events are not listed here: anything whose `type` tag
/// parses as a [`StreamType`](super::StreamType) is passed through to
/// subscribed TPAs without a dedicated variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GlassesMessage {
    #[serde(rename_all = "camelCase")]
    ConnectionInit {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        core_token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StartApp { package_name: String },
    #[serde(rename_all = "camelCase")]
    StopApp { package_name: String },
    #[serde(rename_all = "camelCase")]
    DashboardState { is_open: bool },
}

/// Lifecycle states reported to the glasses in `app_state_update` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    NotInstalled,
    Installed,
    Booting,
    Running,
    Stopped,
    Error,
}

/// Messages pushed to the glasses client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudToGlassesMessage {
    #[serde(rename_all = "camelCase")]
    ConnectionAck { session_id: String },
    ConnectionError { message: String },
    #[serde(rename_all = "camelCase")]
    DisplayEvent {
        layout: Layout,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    AppStateUpdate {
        package_name: String,
        status: AppStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}
