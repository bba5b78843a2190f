use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::webhook::{RegisteredApp, WebhookClient};
use crate::display::{DisplayArbitrator, DisplayPriority, DisplayRecord};
use crate::error::RelayError;
use crate::nats::NatsClient;
use crate::proto::{
    AppStatus, CloudToGlassesMessage, CloudToTpaMessage, GlassesMessage, Layout, StreamType,
    TranscriptionData, WebhookStatus,
};
use crate::session::{AppSession, AppSessionState, SessionSummary, UserSession};
use crate::subscription::{SubscriptionChange, SubscriptionRegistry};
use crate::transcript::{TranscriptProcessor, TranscriptSegment};

/// Tunables for the hub, fixed at construction.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bound on the init handshake for both channels.
    pub handshake_timeout: Duration,
    pub max_chars_per_line: usize,
    pub max_lines: usize,
    pub max_final_transcripts: usize,
    pub max_display_history: usize,
    pub max_transcript_segments: usize,
    /// Format of the raw PCM carried on the glasses binary channel.
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            max_chars_per_line: 30,
            max_lines: 3,
            max_final_transcripts: 3,
            max_display_history: 100,
            max_transcript_segments: 100,
            audio_sample_rate: 16000,
            audio_channels: 1,
        }
    }
}

/// The session hub: owns all live glasses sessions and TPA connections,
/// dispatches inbound frames, fans events out to subscribers, and forwards
/// arbitrated display layouts back to the glasses.
///
/// All shared state is process-wide; per-call critical sections are short
/// and outbound sends are non-blocking channel pushes drained by
/// per-connection writer tasks. The arbitrator lock alone is held across
/// its display push so the frame order seen by the glasses matches the
/// arbitration order.
pub struct SessionHub {
    config: HubConfig,
    apps: HashMap<String, RegisteredApp>,
    sessions: RwLock<HashMap<String, UserSession>>,
    registry: Mutex<SubscriptionRegistry>,
    arbitrator: Mutex<DisplayArbitrator>,
    webhooks: WebhookClient,
    nats: Option<Arc<NatsClient>>,
    app_generation: AtomicU64,
}

impl SessionHub {
    pub fn new(config: HubConfig, apps: Vec<RegisteredApp>, nats: Option<Arc<NatsClient>>) -> Self {
        let apps = apps
            .into_iter()
            .map(|app| (app.package_name.clone(), app))
            .collect();

        Self {
            arbitrator: Mutex::new(DisplayArbitrator::new(config.max_display_history)),
            config,
            apps,
            sessions: RwLock::new(HashMap::new()),
            registry: Mutex::new(SubscriptionRegistry::new()),
            webhooks: WebhookClient::new(),
            nats,
            app_generation: AtomicU64::new(0),
        }
    }

    /// Registers a new glasses session and returns its id.
    pub async fn create_session(
        &self,
        user_id: &str,
        glasses_tx: mpsc::UnboundedSender<CloudToGlassesMessage>,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let transcript = TranscriptProcessor::new(
            self.config.max_chars_per_line,
            self.config.max_lines,
            self.config.max_final_transcripts,
        );
        let session = UserSession::new(
            session_id.clone(),
            user_id.to_string(),
            glasses_tx,
            transcript,
            self.config.max_transcript_segments,
        );

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);
        info!(session_id, user_id, "created session");
        session_id
    }

    /// Tears a session down: closes every TPA channel bound to it, clears
    /// the active display and pending timers, drops all registry and
    /// history keys.
    ///
    /// Dropping the session row drops the hub's frame senders; each TPA
    /// writer task sees its channel close and shuts the socket down. The
    /// session row is removed before the arbitrator is cleared, so a
    /// display request racing this call either lands before the wipe or is
    /// rejected by the liveness check in
    /// [`handle_display_request`](Self::handle_display_request).
    pub async fn end_session(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            info!(session_id, "ended session");
        }
        self.registry.lock().await.remove_session(session_id);
        self.arbitrator.lock().await.clear_session(session_id);
    }

    /// Dispatches a JSON text frame from the glasses transport.
    ///
    /// Control messages get typed handling; any other frame whose `type`
    /// tag is a known stream token is passed through to subscribed TPAs.
    /// Unknown types are logged and ignored.
    pub async fn dispatch_glasses_frame(self: &Arc<Self>, session_id: &str, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(session_id, %err, "malformed glasses frame");
                return;
            }
        };
        let Some(tag) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
            warn!(session_id, "glasses frame missing type tag");
            return;
        };

        match serde_json::from_value::<GlassesMessage>(value.clone()) {
            Ok(GlassesMessage::ConnectionInit { .. }) => {
                debug!(session_id, "duplicate connection_init ignored");
            }
            Ok(GlassesMessage::StartApp { package_name }) => {
                if let Err(err) = self.start_app(session_id, &package_name).await {
                    warn!(session_id, package_name, %err, "start_app failed");
                }
            }
            Ok(GlassesMessage::StopApp { package_name }) => {
                if let Err(err) = self.stop_app(session_id, &package_name).await {
                    warn!(session_id, package_name, %err, "stop_app failed");
                }
            }
            Ok(GlassesMessage::DashboardState { is_open }) => {
                self.handle_dashboard_state(session_id, is_open).await;
            }
            Err(_) => match StreamType::from_str(&tag) {
                Ok(stream) => self.broadcast(session_id, stream, value).await,
                Err(_) => {
                    warn!(
                        session_id,
                        "{}",
                        RelayError::UnknownMessageType(tag.clone())
                    );
                }
            },
        }
    }

    /// Starts a TPA for a session: marks it connecting, fires the
    /// `session_request` webhook, and arms the handshake timeout.
    pub async fn start_app(
        self: &Arc<Self>,
        session_id: &str,
        package_name: &str,
    ) -> Result<(), RelayError> {
        let Some(app) = self.apps.get(package_name).cloned() else {
            self.push_app_state(session_id, package_name, AppStatus::NotInstalled, None)
                .await;
            return Err(RelayError::AppNotFound(package_name.to_string()));
        };

        let generation = self.next_generation();
        let user_id = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))?;
            session.app_sessions.insert(
                package_name.to_string(),
                AppSession::connecting(package_name, generation),
            );
            Self::push_to_glasses(
                session,
                CloudToGlassesMessage::AppStateUpdate {
                    package_name: package_name.to_string(),
                    status: AppStatus::Booting,
                    error: None,
                },
            );
            session.user_id.clone()
        };

        info!(session_id, package_name, "starting app");

        let webhook = self
            .webhooks
            .session_request(&app.webhook_url, session_id, &user_id)
            .await;
        match webhook {
            Ok(response) if matches!(response.status, WebhookStatus::Success) => {}
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "webhook returned error status".to_string());
                self.fail_app(session_id, package_name, generation, &message)
                    .await;
                return Err(RelayError::WebhookRejected(message));
            }
            Err(err) => {
                self.fail_app(session_id, package_name, generation, &err.to_string())
                    .await;
                return Err(err);
            }
        }

        let hub = Arc::clone(self);
        let sid = session_id.to_string();
        let pkg = package_name.to_string();
        let timeout = self.config.handshake_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            hub.expire_handshake(&sid, &pkg, generation).await;
        });

        Ok(())
    }

    /// Stops a TPA for a session: closes its channel, drops its
    /// subscriptions, and fires the `stop_request` webhook.
    pub async fn stop_app(&self, session_id: &str, package_name: &str) -> Result<(), RelayError> {
        let app = self
            .apps
            .get(package_name)
            .cloned()
            .ok_or_else(|| RelayError::AppNotFound(package_name.to_string()))?;

        let user_id = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))?;
            if let Some(app_session) = session.app_sessions.get_mut(package_name) {
                app_session.state = AppSessionState::Disconnected;
                app_session.tx = None;
                app_session.disconnected_at = Some(chrono::Utc::now());
            }
            Self::push_to_glasses(
                session,
                CloudToGlassesMessage::AppStateUpdate {
                    package_name: package_name.to_string(),
                    status: AppStatus::Stopped,
                    error: None,
                },
            );
            session.user_id.clone()
        };

        self.registry.lock().await.remove(session_id, package_name);

        // Stop webhooks are best-effort; the app is already torn down.
        if let Err(err) = self
            .webhooks
            .stop_request(&app.webhook_url, session_id, &user_id)
            .await
        {
            warn!(session_id, package_name, %err, "stop webhook failed");
        }

        info!(session_id, package_name, "stopped app");
        Ok(())
    }

    /// Validates a TPA's init message and binds its transport.
    ///
    /// A second handshake for the same (session, package) replaces the
    /// earlier row under a fresh generation (last-writer-wins); the
    /// displaced sender is dropped, which closes the old writer task.
    pub async fn handle_tpa_init(
        &self,
        session_id: &str,
        package_name: &str,
        api_key: &str,
        tpa_tx: mpsc::UnboundedSender<CloudToTpaMessage>,
    ) -> Result<(), RelayError> {
        let registered = self
            .apps
            .get(package_name)
            .ok_or_else(|| RelayError::AppNotFound(package_name.to_string()))?;

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))?;
        let app_session = session
            .app_sessions
            .get_mut(package_name)
            .ok_or_else(|| RelayError::NotPending {
                package_name: package_name.to_string(),
            })?;

        if !matches!(
            app_session.state,
            AppSessionState::Connecting | AppSessionState::Connected | AppSessionState::Subscribed
        ) {
            return Err(RelayError::NotPending {
                package_name: package_name.to_string(),
            });
        }

        if api_key != registered.api_key {
            app_session.state = AppSessionState::Error;
            app_session.tx = None;
            return Err(RelayError::CredentialInvalid {
                package_name: package_name.to_string(),
            });
        }

        app_session.generation = self.next_generation();
        app_session.state = AppSessionState::Connected;
        app_session.disconnected_at = None;
        app_session.tx = Some(tpa_tx.clone());

        if tpa_tx
            .send(CloudToTpaMessage::TpaConnectionAck { settings: None })
            .is_err()
        {
            warn!(session_id, package_name, "TPA closed before ack");
        }

        Self::push_to_glasses(
            session,
            CloudToGlassesMessage::AppStateUpdate {
                package_name: package_name.to_string(),
                status: AppStatus::Running,
                error: None,
            },
        );

        info!(session_id, package_name, "TPA connected");
        Ok(())
    }

    /// Replaces the subscription set for a TPA. A bad token rejects the
    /// whole call, leaves the previous set intact, and sends the TPA an
    /// error frame.
    pub async fn handle_subscription_update(
        &self,
        session_id: &str,
        package_name: &str,
        tokens: &[String],
    ) -> Result<(), RelayError> {
        if !self.sessions.read().await.contains_key(session_id) {
            return Err(RelayError::SessionNotFound(session_id.to_string()));
        }

        let update = self
            .registry
            .lock()
            .await
            .update(session_id, package_name, tokens);
        if let Err(err) = update {
            self.push_to_tpa(
                session_id,
                package_name,
                CloudToTpaMessage::TpaConnectionError {
                    message: err.to_string(),
                    code: Some("invalid_subscription".to_string()),
                },
            )
            .await;
            return Err(err);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            if let Some(app_session) = session.app_sessions.get_mut(package_name) {
                if app_session.state == AppSessionState::Connected {
                    app_session.state = AppSessionState::Subscribed;
                }
            }
        }
        Ok(())
    }

    /// Fans one event out to every live subscriber of `stream`.
    ///
    /// Delivery is fire-and-forget per subscriber: a closed channel is
    /// logged and never blocks delivery to the others.
    pub async fn broadcast(&self, session_id: &str, stream: StreamType, data: Value) {
        let subscribers = self
            .registry
            .lock()
            .await
            .subscribers_of(session_id, stream);
        if subscribers.is_empty() {
            return;
        }

        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(session_id) else {
            return;
        };

        for package_name in subscribers {
            let Some(app_session) = session.app_sessions.get(&package_name) else {
                continue;
            };
            if !app_session.is_live() {
                debug!(session_id, package_name, "subscriber not connected");
                continue;
            }
            let frame = CloudToTpaMessage::DataStream {
                stream_type: stream,
                data: data.clone(),
            };
            if let Some(tx) = &app_session.tx {
                if tx.send(frame).is_err() {
                    warn!(
                        session_id,
                        "{}",
                        RelayError::DeliveryFailure(package_name.clone())
                    );
                }
            }
        }
    }

    /// Arbitrates a TPA display request; on acceptance pushes the layout
    /// to the glasses and arms the auto-clear timer.
    ///
    /// The arbitrator lock is held from the liveness check through the
    /// push: the push is a non-blocking channel send, and holding the lock
    /// keeps the `display_event` order identical to the arbitration order
    /// when two TPAs race on one session.
    pub async fn handle_display_request(
        self: &Arc<Self>,
        session_id: &str,
        package_name: &str,
        layout: Layout,
        priority: DisplayPriority,
        duration_ms: Option<u64>,
    ) -> bool {
        let mut arbitrator = self.arbitrator.lock().await;

        // A TPA connection can outlive its session; nothing is arbitrated
        // or recorded for a torn-down session. Checked under the arbitrator
        // lock so end_session's wipe cannot interleave.
        if !self.sessions.read().await.contains_key(session_id) {
            debug!(session_id, package_name, "display request for ended session");
            return false;
        }

        let Some(generation) = arbitrator.request_display(
            session_id,
            package_name,
            layout.clone(),
            priority,
            duration_ms,
        ) else {
            return false;
        };

        self.push_display(session_id, layout, duration_ms).await;
        drop(arbitrator);

        if let Some(ms) = duration_ms {
            let hub = Arc::clone(self);
            let sid = session_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let mut arbitrator = hub.arbitrator.lock().await;
                if arbitrator.expire(&sid, generation) {
                    hub.push_display(&sid, Layout::empty(), None).await;
                }
            });
        }
        true
    }

    /// Marks a TPA transport as closed. Subscription and display history
    /// keys are retained until session teardown.
    pub async fn handle_transport_close(&self, session_id: &str, package_name: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        if let Some(app_session) = session.app_sessions.get_mut(package_name) {
            app_session.state = AppSessionState::Disconnected;
            app_session.tx = None;
            app_session.disconnected_at = Some(chrono::Utc::now());
            info!(session_id, package_name, "TPA disconnected");
        }
    }

    /// Forwards a raw PCM frame from the glasses binary channel to the STT
    /// service and to `audio_chunk` subscribers. Dropped when nothing in
    /// the session wants media.
    pub async fn handle_audio(&self, session_id: &str, pcm: &[u8]) {
        if !self
            .registry
            .lock()
            .await
            .has_media_subscriptions(session_id)
        {
            return;
        }

        let sequence = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(session_id) else {
                return;
            };
            session.audio_seq += 1;
            session.audio_seq
        };

        if let Some(nats) = &self.nats {
            if let Err(err) = nats
                .publish_audio_frame(
                    session_id,
                    pcm,
                    self.config.audio_sample_rate,
                    self.config.audio_channels,
                    sequence,
                    false,
                )
                .await
            {
                error!(session_id, %err, "failed to publish audio frame");
            }
        }

        let data = json!({
            "pcm": base64::engine::general_purpose::STANDARD.encode(pcm),
            "sampleRate": self.config.audio_sample_rate,
            "channels": self.config.audio_channels,
            "sequence": sequence,
        });
        self.broadcast(session_id, StreamType::AudioChunk, data).await;
    }

    /// Feeds one interim/final transcript event into the session's
    /// processor and broadcasts it to `transcription` subscribers.
    pub async fn handle_transcription(
        &self,
        session_id: &str,
        text: &str,
        is_final: bool,
        speaker_id: Option<String>,
    ) {
        let data = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(session_id) else {
                return;
            };
            session.transcript.process(Some(text), is_final);

            let elapsed = session.elapsed_ms();
            if is_final {
                session.push_segment(TranscriptSegment {
                    text: text.to_string(),
                    is_final,
                    start_time: elapsed,
                    end_time: elapsed,
                    speaker_id: speaker_id.clone(),
                });
            }
            TranscriptionData {
                text: text.to_string(),
                is_final,
                start_time: elapsed,
                end_time: elapsed,
                speaker_id,
            }
        };

        match serde_json::to_value(&data) {
            Ok(value) => {
                self.broadcast(session_id, StreamType::Transcription, value)
                    .await
            }
            Err(err) => error!(session_id, %err, "failed to encode transcription"),
        }
    }

    async fn handle_dashboard_state(&self, session_id: &str, is_open: bool) {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(session_id) {
                session.dashboard_open = is_open;
            }
        }
        if is_open {
            self.broadcast(
                session_id,
                StreamType::OpenDashboard,
                json!({ "isOpen": true }),
            )
            .await;
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics accessors (REST API)
    // ------------------------------------------------------------------

    pub async fn session_summaries(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> =
            sessions.values().map(SessionSummary::of).collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    pub async fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(SessionSummary::of)
    }

    /// Current rendered caption view plus the finalized segment history.
    pub async fn transcript_of(
        &self,
        session_id: &str,
    ) -> Option<(String, Vec<TranscriptSegment>)> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(session_id)?;
        Some((
            session.transcript.current_view(),
            session.segments.iter().cloned().collect(),
        ))
    }

    pub async fn display_history(
        &self,
        session_id: &str,
        package_name: &str,
    ) -> Vec<DisplayRecord> {
        self.arbitrator
            .lock()
            .await
            .history_of(session_id, package_name)
    }

    pub async fn active_display(&self, session_id: &str) -> Option<DisplayRecord> {
        self.arbitrator
            .lock()
            .await
            .active_display(session_id)
            .cloned()
    }

    pub async fn subscription_state(
        &self,
        session_id: &str,
        package_name: &str,
    ) -> (Vec<StreamType>, Vec<SubscriptionChange>) {
        let registry = self.registry.lock().await;
        let current: HashSet<StreamType> = registry.subscriptions_of(session_id, package_name);
        let mut current: Vec<StreamType> = current.into_iter().collect();
        current.sort_by_key(StreamType::as_str);
        (current, registry.history_of(session_id, package_name))
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.config.handshake_timeout
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn next_generation(&self) -> u64 {
        self.app_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Handshake timer body: only fires if this generation is still the
    /// one awaiting its init message.
    async fn expire_handshake(&self, session_id: &str, package_name: &str, generation: u64) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        let Some(app_session) = session.app_sessions.get_mut(package_name) else {
            return;
        };
        if app_session.generation != generation
            || app_session.state != AppSessionState::Connecting
        {
            return;
        }

        app_session.state = AppSessionState::Error;
        warn!(
            session_id,
            package_name,
            "{}",
            RelayError::HandshakeTimeout
        );
        Self::push_to_glasses(
            session,
            CloudToGlassesMessage::AppStateUpdate {
                package_name: package_name.to_string(),
                status: AppStatus::Error,
                error: Some(RelayError::HandshakeTimeout.to_string()),
            },
        );
    }

    async fn fail_app(
        &self,
        session_id: &str,
        package_name: &str,
        generation: u64,
        message: &str,
    ) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        if let Some(app_session) = session.app_sessions.get_mut(package_name) {
            if app_session.generation == generation {
                app_session.state = AppSessionState::Error;
            }
        }
        Self::push_to_glasses(
            session,
            CloudToGlassesMessage::AppStateUpdate {
                package_name: package_name.to_string(),
                status: AppStatus::Error,
                error: Some(message.to_string()),
            },
        );
    }

    async fn push_to_tpa(&self, session_id: &str, package_name: &str, frame: CloudToTpaMessage) {
        let sessions = self.sessions.read().await;
        let Some(app_session) = sessions
            .get(session_id)
            .and_then(|session| session.app_sessions.get(package_name))
        else {
            return;
        };
        if let Some(tx) = &app_session.tx {
            let _ = tx.send(frame);
        }
    }

    async fn push_display(&self, session_id: &str, layout: Layout, duration_ms: Option<u64>) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            Self::push_to_glasses(
                session,
                CloudToGlassesMessage::DisplayEvent {
                    layout,
                    duration_ms,
                },
            );
        }
    }

    async fn push_app_state(
        &self,
        session_id: &str,
        package_name: &str,
        status: AppStatus,
        error: Option<String>,
    ) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            Self::push_to_glasses(
                session,
                CloudToGlassesMessage::AppStateUpdate {
                    package_name: package_name.to_string(),
                    status,
                    error,
                },
            );
        }
    }

    fn push_to_glasses(session: &UserSession, message: CloudToGlassesMessage) {
        if session.glasses_tx.send(message).is_err() {
            warn!(
                session_id = %session.session_id,
                "glasses transport closed, frame dropped"
            );
        }
    }
}
