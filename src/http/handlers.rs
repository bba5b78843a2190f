use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

use super::state::AppState;
use crate::display::DisplayRecord;
use crate::subscription::SubscriptionChange;
use crate::transcript::TranscriptSegment;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResponse {
    /// Rendered caption view, wrapped and padded to the display geometry.
    pub view: String,
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<DisplayRecord>,
    pub history: Vec<DisplayRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStateResponse {
    pub subscriptions: Vec<String>,
    pub history: Vec<SubscriptionChange>,
}

fn not_found(session_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session {} not found", session_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /sessions
/// List all live sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.session_summaries().await)
}

/// GET /sessions/:session_id
/// Snapshot of one session and its app connections
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.session_summary(&session_id).await {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/transcript
/// Current caption view plus finalized segments
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.hub.transcript_of(&session_id).await {
        Some((view, segments)) => {
            (StatusCode::OK, Json(TranscriptResponse { view, segments })).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/displays/:package_name
/// Active display for the session and the request history for one app
pub async fn get_displays(
    State(state): State<AppState>,
    Path((session_id, package_name)): Path<(String, String)>,
) -> impl IntoResponse {
    if !state.hub.has_session(&session_id).await {
        return not_found(&session_id);
    }
    let active = state.hub.active_display(&session_id).await;
    let history = state.hub.display_history(&session_id, &package_name).await;
    (StatusCode::OK, Json(DisplayStateResponse { active, history })).into_response()
}

/// GET /sessions/:session_id/subscriptions/:package_name
/// Current subscription set and change log for one app
pub async fn get_subscriptions(
    State(state): State<AppState>,
    Path((session_id, package_name)): Path<(String, String)>,
) -> impl IntoResponse {
    if !state.hub.has_session(&session_id).await {
        return not_found(&session_id);
    }
    let (subscriptions, history) = state
        .hub
        .subscription_state(&session_id, &package_name)
        .await;
    let subscriptions = subscriptions
        .into_iter()
        .map(|s| s.as_str().to_string())
        .collect();
    (
        StatusCode::OK,
        Json(SubscriptionStateResponse {
            subscriptions,
            history,
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
