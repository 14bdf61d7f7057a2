//! Per-call conversation state and the registry that owns it.
//!
//! The registry is the only structure shared across calls. Every operation
//! takes the lock once, does its work and returns an owned value, so no
//! caller ever holds a reference into a session across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use popline_types::{HistoryTurn, Role};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// State of one active phone call.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub stream_id: String,
    pub call_id: String,
    pub account_id: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: Instant,
    pub history: Vec<HistoryTurn>,
    /// True while an agent turn is in flight.
    pub is_processing: bool,
    /// Sequence number of the in-flight turn, if any.
    pub current_turn: Option<u64>,
}

impl CallSession {
    fn new(stream_id: &str, call_id: &str, account_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            call_id: call_id.to_string(),
            account_id: account_id.to_string(),
            start_time: Utc::now(),
            last_activity: Instant::now(),
            history: Vec::new(),
            is_processing: false,
            current_turn: None,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Call sessions keyed by media stream id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, CallSession>>,
    /// Turn sequence shared by every session so numbers are never reused,
    /// even when a stream id comes back.
    turn_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CallSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a fresh session, replacing any previous one for the stream.
    pub fn create(&self, stream_id: &str, call_id: &str, account_id: &str) -> CallSession {
        let session = CallSession::new(stream_id, call_id, account_id);
        if self
            .lock()
            .insert(stream_id.to_string(), session.clone())
            .is_some()
        {
            tracing::warn!(stream_id, "replaced existing call session");
        }
        session
    }

    /// Snapshot of a session.
    pub fn get(&self, stream_id: &str) -> Option<CallSession> {
        self.lock().get(stream_id).cloned()
    }

    /// Appends a plain text turn. Returns false if the session is gone.
    pub fn add_message(&self, stream_id: &str, role: Role, text: &str) -> bool {
        let turn = match role {
            Role::User => HistoryTurn::user_text(text),
            Role::Assistant => HistoryTurn::assistant_text(text),
        };
        self.with_session(stream_id, |session| session.history.push(turn))
            .is_some()
    }

    /// Appends the turns produced by turn `seq`, provided it is still current.
    pub fn append_turns(&self, stream_id: &str, seq: u64, turns: Vec<HistoryTurn>) -> bool {
        self.with_session(stream_id, |session| {
            if session.current_turn != Some(seq) {
                return false;
            }
            session.history.extend(turns);
            true
        })
        .unwrap_or(false)
    }

    pub fn history(&self, stream_id: &str) -> Vec<HistoryTurn> {
        self.lock()
            .get(stream_id)
            .map(|session| session.history.clone())
            .unwrap_or_default()
    }

    pub fn is_processing(&self, stream_id: &str) -> bool {
        self.lock()
            .get(stream_id)
            .is_some_and(|session| session.is_processing)
    }

    /// Starts a new turn, superseding any in flight, and returns its
    /// sequence number.
    pub fn begin_turn(&self, stream_id: &str) -> Option<u64> {
        self.with_session(stream_id, |session| {
            let seq = self.turn_seq.fetch_add(1, Ordering::Relaxed) + 1;
            session.is_processing = true;
            session.current_turn = Some(seq);
            seq
        })
    }

    pub fn is_current_turn(&self, stream_id: &str, seq: u64) -> bool {
        self.lock()
            .get(stream_id)
            .is_some_and(|session| session.current_turn == Some(seq))
    }

    /// Clears the in-flight flag if `seq` is still the current turn.
    pub fn finish_turn(&self, stream_id: &str, seq: u64) -> bool {
        self.with_session(stream_id, |session| {
            if session.current_turn != Some(seq) {
                return false;
            }
            session.is_processing = false;
            session.current_turn = None;
            true
        })
        .unwrap_or(false)
    }

    /// Marks the session active now.
    pub fn touch(&self, stream_id: &str) {
        if let Some(session) = self.lock().get_mut(stream_id) {
            session.touch();
        }
    }

    pub fn delete(&self, stream_id: &str) -> bool {
        self.lock().remove(stream_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes sessions idle for longer than `idle_timeout` as of `now`.
    /// Returns the evicted stream ids.
    pub fn evict_idle_at(&self, now: Instant, idle_timeout: Duration) -> Vec<String> {
        let mut evicted = Vec::new();
        self.lock().retain(|stream_id, session| {
            let keep = now.saturating_duration_since(session.last_activity) <= idle_timeout;
            if !keep {
                evicted.push(stream_id.clone());
            }
            keep
        });
        evicted
    }

    pub fn sweep(&self, idle_timeout: Duration) -> Vec<String> {
        self.evict_idle_at(Instant::now(), idle_timeout)
    }

    fn with_session<T>(&self, stream_id: &str, f: impl FnOnce(&mut CallSession) -> T) -> Option<T> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(stream_id)?;
        session.touch();
        Some(f(session))
    }
}

/// Starts the idle-session sweep.
///
/// Runs until the returned handle is aborted, evicting sessions whose
/// last activity is older than `idle_timeout` every `interval`.
pub fn start_sweep_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tracing::info!(
        interval_secs = interval.as_secs(),
        idle_timeout_secs = idle_timeout.as_secs(),
        "starting call session sweep"
    );

    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            let evicted = registry.sweep(idle_timeout);
            if !evicted.is_empty() {
                tracing::info!(
                    count = evicted.len(),
                    remaining = registry.len(),
                    "evicted idle call sessions"
                );
                for stream_id in evicted {
                    tracing::debug!(stream_id = %stream_id, "evicted call session");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Moves a session's last activity `by` into the future.
    fn shift(registry: &SessionRegistry, stream_id: &str, by: Duration) {
        let mut sessions = registry.lock();
        let session = sessions.get_mut(stream_id).unwrap();
        session.last_activity += by;
    }

    #[test]
    fn create_get_add_delete() {
        let registry = SessionRegistry::new();
        let created = registry.create("MZ1", "CA1", "AC1");
        assert_eq!(created.call_id, "CA1");
        assert!(created.history.is_empty());

        assert!(registry.add_message("MZ1", Role::User, "こんにちは"));
        assert!(registry.add_message("MZ1", Role::Assistant, "はい"));
        assert!(!registry.add_message("missing", Role::User, "x"));

        let session = registry.get("MZ1").unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::User);
        assert_eq!(session.history[1].text(), Some("はい"));

        assert!(registry.delete("MZ1"));
        assert!(!registry.delete("MZ1"));
        assert!(registry.get("MZ1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_sessions_are_swept() {
        let registry = SessionRegistry::new();
        registry.create("stale", "CA1", "AC1");
        registry.create("fresh", "CA2", "AC1");
        shift(&registry, "fresh", Duration::from_secs(2 * 60));

        let later = Instant::now() + Duration::from_secs(31 * 60);
        let evicted = registry.evict_idle_at(later, Duration::from_secs(30 * 60));
        assert_eq!(evicted, vec!["stale".to_string()]);
        assert!(registry.get("stale").is_none());
        assert!(registry.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_eviction() {
        let registry = SessionRegistry::new();
        registry.create("MZ1", "CA1", "AC1");
        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        registry.touch("MZ1");
        tokio::time::advance(Duration::from_secs(20 * 60)).await;

        assert!(registry.sweep(Duration::from_secs(30 * 60)).is_empty());
        assert_eq!(registry.len(), 1);

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        assert_eq!(registry.sweep(Duration::from_secs(30 * 60)).len(), 1);
    }

    #[test]
    fn newer_turn_supersedes_older() {
        let registry = SessionRegistry::new();
        registry.create("MZ1", "CA1", "AC1");

        let first = registry.begin_turn("MZ1").unwrap();
        assert!(registry.is_processing("MZ1"));
        let second = registry.begin_turn("MZ1").unwrap();
        assert!(second > first);
        assert!(!registry.is_current_turn("MZ1", first));

        assert!(!registry.append_turns("MZ1", first, vec![HistoryTurn::user_text("old")]));
        assert!(!registry.finish_turn("MZ1", first));
        assert!(registry.is_processing("MZ1"));

        assert!(registry.append_turns("MZ1", second, vec![HistoryTurn::user_text("new")]));
        assert!(registry.finish_turn("MZ1", second));
        assert!(!registry.is_processing("MZ1"));

        let history = registry.history("MZ1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text(), Some("new"));
    }

    #[test]
    fn turn_numbers_survive_stream_reuse() {
        let registry = SessionRegistry::new();
        registry.create("MZ1", "CA1", "AC1");
        let before = registry.begin_turn("MZ1").unwrap();
        registry.delete("MZ1");

        registry.create("MZ1", "CA2", "AC1");
        assert!(!registry.is_current_turn("MZ1", before));
        let after = registry.begin_turn("MZ1").unwrap();
        assert!(after > before);
        assert!(registry.begin_turn("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_runs_on_interval() {
        let registry = Arc::new(SessionRegistry::new());
        registry.create("stale", "CA1", "AC1");

        let task = start_sweep_task(
            registry.clone(),
            Duration::from_secs(300),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(registry.is_empty());
        task.abort();
    }
}
