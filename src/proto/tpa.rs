use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Layout, StreamType};

/// Messages from a TPA connection, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TpaMessage {
    #[serde(rename_all = "camelCase")]
    TpaConnectionInit {
        package_name: String,
        session_id: String,
        api_key: String,
    },
    #[serde(rename_all = "camelCase")]
    DisplayEvent {
        package_name: String,
        layout: Layout,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionUpdate {
        package_name: String,
        subscriptions: Vec<String>,
    },
}

/// Messages pushed to a TPA connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudToTpaMessage {
    TpaConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        settings: Option<Value>,
    },
    TpaConnectionError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DataStream { stream_type: StreamType, data: Value },
    #[serde(rename_all = "camelCase")]
    SettingsUpdate {
        package_name: String,
        settings: Value,
    },
}

/// Payload of `data_stream` frames for the `transcription` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionData {
    pub text: String,
    pub is_final: bool,
    /// Milliseconds from session start.
    pub start_time: i64,
    pub end_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}

/// Webhook request POSTed to a TPA's registered endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookRequest {
    #[serde(rename_all = "camelCase")]
    SessionRequest {
        session_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StopRequest {
        session_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: WebhookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
