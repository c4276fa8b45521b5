use parking_lot::Mutex;
use std::collections::HashMap;

use super::{Role, Session, SessionKey, SessionSummary};

/// Owned map of session key to [`Session`].
///
/// One registry belongs to one gateway instance. The run queue appends turns
/// through it; the command router reads and resets it directly.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_user(&self, key: &SessionKey, content: &str, has_image: bool) {
        self.with_session(key, |s| s.push(Role::User, content, has_image));
    }

    pub fn record_assistant(&self, key: &SessionKey, content: &str) {
        self.with_session(key, |s| s.push(Role::Assistant, content, false));
    }

    fn with_session(&self, key: &SessionKey, f: impl FnOnce(&mut Session)) {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(key.clone()));
        f(session);
    }

    /// Snapshot of one session.
    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.lock().get(key).cloned()
    }

    pub fn message_count(&self, key: &SessionKey) -> u64 {
        self.sessions
            .lock()
            .get(key)
            .map_or(0, |s| s.message_count)
    }

    /// Drop the session. Returns whether one existed.
    pub fn reset(&self, key: &SessionKey) -> bool {
        self.sessions.lock().remove(key).is_some()
    }

    /// Summaries ordered by most recent activity first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> =
            self.sessions.lock().values().map(Session::summary).collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
