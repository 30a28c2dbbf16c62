//! Per-session state: which tools a conversation has discovered so far, and
//! the callbacks that back them.
//!
//! Grounded on the teacher's `tracker.rs` concurrency shape: a `DashMap`
//! keyed by identity (there, backend name; here, [`SessionId`]) with each
//! entry's mutable state behind its own `Mutex`, recovered from poisoning the
//! same way (`unwrap_or_else(|e| e.into_inner())`) rather than propagating a
//! panic from one session into another's lock.

use std::collections::HashSet;
use std::sync::Mutex;

use dashmap::DashMap;

use crate::model::{SessionId, ToolCallback};

/// Whether newly discovered tool names replace or accumulate onto the
/// previous turn's set. See `InterceptorConfig::accumulate_discovered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Union with everything discovered so far this session (monotonic).
    Accumulate,
    /// Each turn's discovered set replaces the prior one.
    Replace,
}

/// One conversation's discovered-tool set and callback cache.
struct SessionState {
    discovered: HashSet<String>,
    callbacks: std::collections::HashMap<String, ToolCallback>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            discovered: HashSet::new(),
            callbacks: std::collections::HashMap::new(),
        }
    }
}

/// Concurrent map of session id to session state. Sessions never block each
/// other; mutation within one session is serialized by its own `Mutex`.
pub struct SessionStore {
    sessions: DashMap<SessionId, Mutex<SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    /// Register a tool's callback with the session so it is callable once
    /// discovered. Registering twice under the same name replaces the entry
    /// (later registration wins — mirrors `KeywordSearcher::index_tool`).
    pub fn register_callback(&self, session_id: &SessionId, callback: ToolCallback) {
        let entry = self.sessions.entry(session_id.clone()).or_insert_with(|| Mutex::new(SessionState::new()));
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.callbacks.insert(callback.name().to_string(), callback);
    }

    /// Merge newly discovered tool names into the session per `mode`. Names
    /// absent from the callback registry are the `UnknownToolReferenced` case
    /// from a hallucinated search result — dropped, not fatal, but logged.
    pub fn record_discovered(&self, session_id: &SessionId, names: impl IntoIterator<Item = String>, mode: DiscoveryMode) {
        let entry = self.sessions.entry(session_id.clone()).or_insert_with(|| Mutex::new(SessionState::new()));
        let mut state = entry.lock().unwrap_or_else(|e| e.into_inner());
        let known: Vec<String> = names
            .into_iter()
            .filter(|n| {
                let is_known = state.callbacks.contains_key(n);
                if !is_known {
                    tracing::warn!(session_id = %session_id, tool = %n, "discovered an unknown tool name; dropping");
                }
                is_known
            })
            .collect();
        match mode {
            DiscoveryMode::Accumulate => {
                state.discovered.extend(known);
            }
            DiscoveryMode::Replace => {
                state.discovered = known.into_iter().collect();
            }
        }
    }

    /// The callbacks currently advertised to the model for this session:
    /// every discovered name that still has a registered callback.
    pub fn advertised_callbacks(&self, session_id: &SessionId) -> Vec<ToolCallback> {
        let Some(entry) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state
            .discovered
            .iter()
            .filter_map(|name| state.callbacks.get(name).cloned())
            .collect()
    }

    /// Look up a single callback by name, regardless of discovery state —
    /// used once a tool call for a discovered name actually needs executing.
    pub fn find_callback(&self, session_id: &SessionId, name: &str) -> Option<ToolCallback> {
        let entry = self.sessions.get(session_id)?;
        let state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.callbacks.get(name).cloned()
    }

    /// True if `name` is registered for this session, discovered or not.
    pub fn is_known_tool(&self, session_id: &SessionId, name: &str) -> bool {
        let Some(entry) = self.sessions.get(session_id) else {
            return false;
        };
        let state = entry.lock().unwrap_or_else(|e| e.into_inner());
        state.callbacks.contains_key(name)
    }

    /// Drop all state for a session: discovered set and callback cache.
    /// Idempotent. Callers are also responsible for clearing the matching
    /// retriever index via `ToolSearcher::clear_index`.
    pub fn end_session(&self, session_id: &SessionId) {
        self.sessions.remove(session_id);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
