use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::proto::Layout;
use crate::subscription::SubscriptionKey;

/// Priority tiers for display requests. Only an unexpired `System` layout
/// blocks lower tiers; everything else is last-writer-wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPriority {
    Background,
    App,
    System,
}

/// Record of a single display request, kept in per-(session, app) history
/// whether or not the request was accepted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRecord {
    pub layout: Layout,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub package_name: String,
    pub session_id: String,
    pub priority: DisplayPriority,
    pub accepted: bool,
}

struct ActiveDisplay {
    record: DisplayRecord,
    generation: u64,
    expires_at: Option<Instant>,
}

/// Single source of truth for what is currently on each session's display.
///
/// Acceptance bumps a global generation counter; auto-clear tasks capture
/// the generation they were armed for and [`expire`](Self::expire) refuses
/// to clear a slot a newer request has since taken over, so a stale timer
/// is a no-op.
pub struct DisplayArbitrator {
    active: HashMap<String, ActiveDisplay>,
    history: HashMap<SubscriptionKey, VecDeque<DisplayRecord>>,
    max_history: usize,
    next_generation: u64,
}

impl DisplayArbitrator {
    pub fn new(max_history: usize) -> Self {
        Self {
            active: HashMap::new(),
            history: HashMap::new(),
            max_history,
            next_generation: 0,
        }
    }

    /// Arbitrates a display request.
    ///
    /// Returns the generation owning the active slot when accepted (the hub
    /// uses it to arm the auto-clear timer), `None` when rejected. The
    /// request is appended to history either way.
    pub fn request_display(
        &mut self,
        session_id: &str,
        package_name: &str,
        layout: Layout,
        priority: DisplayPriority,
        duration_ms: Option<u64>,
    ) -> Option<u64> {
        let accepted = self.accepts(session_id, priority);

        let record = DisplayRecord {
            layout,
            timestamp: Utc::now(),
            duration_ms,
            package_name: package_name.to_string(),
            session_id: session_id.to_string(),
            priority,
            accepted,
        };
        self.push_history(record.clone());

        if !accepted {
            debug!(
                session_id,
                package_name, "display request blocked by active system layout"
            );
            return None;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let expires_at = duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));

        // Replacing the slot implicitly invalidates any earlier timer: its
        // captured generation no longer owns the display.
        self.active.insert(
            session_id.to_string(),
            ActiveDisplay {
                record,
                generation,
                expires_at,
            },
        );

        info!(session_id, package_name, generation, "display accepted");
        Some(generation)
    }

    /// Clears the active display if `generation` still owns it. Returns
    /// true when the slot was cleared (the hub then pushes an empty layout
    /// to the glasses).
    pub fn expire(&mut self, session_id: &str, generation: u64) -> bool {
        match self.active.get(session_id) {
            Some(active) if active.generation == generation => {
                self.active.remove(session_id);
                info!(session_id, generation, "display expired");
                true
            }
            _ => {
                debug!(session_id, generation, "stale display timer ignored");
                false
            }
        }
    }

    /// The currently active display record for a session, if any.
    pub fn active_display(&self, session_id: &str) -> Option<&DisplayRecord> {
        self.active.get(session_id).map(|active| &active.record)
    }

    pub fn history_of(&self, session_id: &str, package_name: &str) -> Vec<DisplayRecord> {
        self.history
            .get(&SubscriptionKey::new(session_id, package_name))
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&mut self, session_id: &str, package_name: &str) {
        self.history
            .remove(&SubscriptionKey::new(session_id, package_name));
    }

    /// Drops the active slot and all history for a session on teardown.
    pub fn clear_session(&mut self, session_id: &str) {
        self.active.remove(session_id);
        self.history.retain(|key, _| key.session_id != session_id);
    }

    fn accepts(&self, session_id: &str, priority: DisplayPriority) -> bool {
        match self.active.get(session_id) {
            Some(active)
                if active.record.priority == DisplayPriority::System
                    && priority < DisplayPriority::System =>
            {
                // An expired system layout no longer blocks anyone.
                match active.expires_at {
                    Some(expires_at) => expires_at <= Instant::now(),
                    None => false,
                }
            }
            _ => true,
        }
    }

    fn push_history(&mut self, record: DisplayRecord) {
        let key = SubscriptionKey::new(&record.session_id, &record.package_name);
        let records = self.history.entry(key).or_default();
        records.push_back(record);
        while records.len() > self.max_history {
            records.pop_front();
        }
    }
}
