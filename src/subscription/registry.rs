use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::RelayError;
use crate::proto::StreamType;

/// Composite key for per-(session, app) records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    pub session_id: String,
    pub package_name: String,
}

impl SubscriptionKey {
    pub fn new(session_id: &str, package_name: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            package_name: package_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Add,
    Update,
    Remove,
}

/// One entry in the append-only subscription history. Kept for
/// diagnostics; routing never consults it.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionChange {
    pub timestamp: DateTime<Utc>,
    pub action: SubscriptionAction,
    pub subscriptions: Vec<StreamType>,
}

/// Per-session subscription sets for TPAs, with wildcard-aware routing
/// queries and an append-only change log.
///
/// Sets are stored in a `BTreeMap` so `subscribers_of` walks keys in a
/// fixed order, keeping fan-out deterministic within a single dispatch.
/// Wildcard tokens are stored distinctly, never expanded into the set.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<SubscriptionKey, HashSet<StreamType>>,
    history: HashMap<SubscriptionKey, Vec<SubscriptionChange>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces (not merges) the subscription set for a (session, app) pair.
    ///
    /// Every token must parse into the fixed enumeration (wildcards
    /// included); a single bad token rejects the entire call and leaves the
    /// previous set untouched.
    pub fn update(
        &mut self,
        session_id: &str,
        package_name: &str,
        tokens: &[String],
    ) -> Result<(), RelayError> {
        let mut parsed = HashSet::with_capacity(tokens.len());
        for token in tokens {
            parsed.insert(StreamType::from_str(token)?);
        }

        let key = SubscriptionKey::new(session_id, package_name);
        let action = if self.subscriptions.contains_key(&key) {
            SubscriptionAction::Update
        } else {
            SubscriptionAction::Add
        };

        self.push_history(&key, action, parsed.iter().copied().collect());
        self.subscriptions.insert(key, parsed);

        info!(
            session_id,
            package_name,
            subscriptions = ?tokens,
            "updated subscriptions"
        );
        Ok(())
    }

    /// Packages in the session whose set contains `stream` or a wildcard.
    /// Order is stable within a single call.
    pub fn subscribers_of(&self, session_id: &str, stream: StreamType) -> Vec<String> {
        self.session_range(session_id)
            .filter(|(_, subs)| Self::set_matches(subs, stream))
            .map(|(key, _)| key.package_name.clone())
            .collect()
    }

    /// The current set for a (session, app) pair; empty if none.
    pub fn subscriptions_of(&self, session_id: &str, package_name: &str) -> HashSet<StreamType> {
        self.subscriptions
            .get(&SubscriptionKey::new(session_id, package_name))
            .cloned()
            .unwrap_or_default()
    }

    /// Removes the set for a (session, app) pair. Idempotent; records a
    /// `remove` history entry only if a set existed.
    pub fn remove(&mut self, session_id: &str, package_name: &str) {
        let key = SubscriptionKey::new(session_id, package_name);
        if let Some(previous) = self.subscriptions.remove(&key) {
            self.push_history(
                &key,
                SubscriptionAction::Remove,
                previous.into_iter().collect(),
            );
            info!(session_id, package_name, "removed subscriptions");
        }
    }

    /// Membership check including wildcard expansion.
    pub fn has(&self, session_id: &str, package_name: &str, stream: StreamType) -> bool {
        self.subscriptions
            .get(&SubscriptionKey::new(session_id, package_name))
            .map(|subs| Self::set_matches(subs, stream))
            .unwrap_or(false)
    }

    /// Whether any package in the session subscribes to a media stream
    /// (audio, transcription, translation). Gates audio forwarding to STT.
    pub fn has_media_subscriptions(&self, session_id: &str) -> bool {
        self.session_range(session_id).any(|(_, subs)| {
            subs.iter().any(StreamType::is_wildcard)
                || subs.iter().any(StreamType::is_media)
        })
    }

    /// The append-only change log for a (session, app) pair.
    pub fn history_of(&self, session_id: &str, package_name: &str) -> Vec<SubscriptionChange> {
        self.history
            .get(&SubscriptionKey::new(session_id, package_name))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops all records for a session. Called on session teardown only;
    /// app disconnects keep their keys alive.
    pub fn remove_session(&mut self, session_id: &str) {
        self.subscriptions
            .retain(|key, _| key.session_id != session_id);
        self.history.retain(|key, _| key.session_id != session_id);
    }

    fn set_matches(subs: &HashSet<StreamType>, stream: StreamType) -> bool {
        subs.contains(&stream)
            || subs.contains(&StreamType::Wildcard)
            || subs.contains(&StreamType::All)
    }

    fn session_range(
        &self,
        session_id: &str,
    ) -> impl Iterator<Item = (&SubscriptionKey, &HashSet<StreamType>)> {
        let start = SubscriptionKey::new(session_id, "");
        let session_id = session_id.to_string();
        self.subscriptions
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(key, _)| key.session_id == session_id)
    }

    fn push_history(
        &mut self,
        key: &SubscriptionKey,
        action: SubscriptionAction,
        mut subscriptions: Vec<StreamType>,
    ) {
        subscriptions.sort_by_key(|s| s.as_str());
        self.history
            .entry(key.clone())
            .or_default()
            .push(SubscriptionChange {
                timestamp: Utc::now(),
                action,
                subscriptions,
            });
    }
}
