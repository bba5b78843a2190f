use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::proto::{CloudToGlassesMessage, CloudToTpaMessage};
use crate::transcript::{TranscriptProcessor, TranscriptSegment};

/// Lifecycle of a TPA's connection within a session.
///
/// `Disconnected → Connecting → Connected → Subscribed → Disconnected|Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppSessionState {
    /// No live transport; history keys are retained until session teardown.
    Disconnected,
    /// Webhook fired, awaiting the TPA's init message within the handshake
    /// timeout.
    Connecting,
    /// Init validated and acknowledged; no subscriptions declared yet.
    Connected,
    /// At least one subscription update received; included in fan-out.
    Subscribed,
    /// Credential mismatch, malformed message, or transport failure.
    Error,
}

/// One (session, TPA package) pair with an active or previously active
/// connection. A reconnect creates a fresh row under a new generation;
/// rows are never resurrected.
pub struct AppSession {
    pub package_name: String,
    pub state: AppSessionState,
    /// Distinguishes this row from earlier rows under the same composite
    /// key; handshake timers check it before acting.
    pub generation: u64,
    /// Present only while the transport is live.
    pub tx: Option<mpsc::UnboundedSender<CloudToTpaMessage>>,
    pub created_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl AppSession {
    pub fn connecting(package_name: &str, generation: u64) -> Self {
        Self {
            package_name: package_name.to_string(),
            state: AppSessionState::Connecting,
            generation,
            tx: None,
            created_at: Utc::now(),
            disconnected_at: None,
        }
    }

    /// Whether the app should be included in fan-out.
    pub fn is_live(&self) -> bool {
        self.tx.is_some()
            && matches!(
                self.state,
                AppSessionState::Connected | AppSessionState::Subscribed
            )
    }
}

/// One logical session per connected glasses client. Owned exclusively by
/// the hub; destroyed when the glasses connection closes.
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    /// Outbound frames to the glasses transport.
    pub glasses_tx: mpsc::UnboundedSender<CloudToGlassesMessage>,
    pub app_sessions: HashMap<String, AppSession>,
    /// Live caption state fed by the STT transcript stream.
    pub transcript: TranscriptProcessor,
    /// Rolling history of finalized segments, oldest evicted first.
    pub segments: VecDeque<TranscriptSegment>,
    max_segments: usize,
    pub dashboard_open: bool,
    /// Sequence counter for audio frames forwarded to STT.
    pub audio_seq: u32,
}

impl UserSession {
    pub fn new(
        session_id: String,
        user_id: String,
        glasses_tx: mpsc::UnboundedSender<CloudToGlassesMessage>,
        transcript: TranscriptProcessor,
        max_segments: usize,
    ) -> Self {
        Self {
            session_id,
            user_id,
            started_at: Utc::now(),
            glasses_tx,
            app_sessions: HashMap::new(),
            transcript,
            segments: VecDeque::new(),
            max_segments,
            dashboard_open: false,
            audio_seq: 0,
        }
    }

    /// Milliseconds elapsed since the session started.
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    pub fn push_segment(&mut self, segment: TranscriptSegment) {
        self.segments.push_back(segment);
        while self.segments.len() > self.max_segments {
            self.segments.pop_front();
        }
    }
}

/// Snapshot of a session for the diagnostics API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub dashboard_open: bool,
    pub apps: Vec<AppSessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSessionSummary {
    pub package_name: String,
    pub state: AppSessionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
    pub fn of(session: &UserSession) -> Self {
        let mut apps: Vec<AppSessionSummary> = session
            .app_sessions
            .values()
            .map(|app| AppSessionSummary {
                package_name: app.package_name.clone(),
                state: app.state,
                created_at: app.created_at,
                disconnected_at: app.disconnected_at,
            })
            .collect();
        apps.sort_by(|a, b| a.package_name.cmp(&b.package_name));

        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            started_at: session.started_at,
            dashboard_open: session.dashboard_open,
            apps,
        }
    }
}
