use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use parley_core::config::OrchestratorConfig;
use parley_core::{Message, Role, SessionKey};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_transcript_messages: usize,
    pub dedupe_window: usize,
    pub dedupe_retain: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { max_transcript_messages: 100, dedupe_window: 1000, dedupe_retain: 500 }
    }
}

impl From<&OrchestratorConfig> for SessionSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_transcript_messages: config.max_transcript_messages,
            dedupe_window: config.dedupe_window,
            dedupe_retain: config.dedupe_retain,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session exists for `{0}`")]
    NotFound(SessionKey),
}

#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    transcript: Vec<Message>,
    processed_event_ids: HashSet<String>,
    event_order: VecDeque<String>,
}

impl Session {
    fn new(key: SessionKey, system_prompt: &str) -> Self {
        Self {
            key,
            transcript: vec![Message::system(system_prompt)],
            processed_event_ids: HashSet::new(),
            event_order: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn processed_event_count(&self) -> usize {
        self.event_order.len()
    }

    pub fn has_processed(&self, event_id: &str) -> bool {
        self.processed_event_ids.contains(event_id)
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

/// Owns every session. The outer map lock is only held to find or insert a handle;
/// callers serialize work on one session through the handle's async mutex.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    system_prompt: String,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>, settings: SessionSettings) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), system_prompt: system_prompt.into(), settings }
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn get_or_create(&self, key: &SessionKey) -> SessionHandle {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };

        let handle = sessions.entry(key.clone()).or_insert_with(|| {
            debug!(event_name = "agent.session.created", session = %key, "created session");
            Arc::new(tokio::sync::Mutex::new(Session::new(key.clone(), &self.system_prompt)))
        });
        Arc::clone(handle)
    }

    pub fn get(&self, key: &SessionKey) -> Result<SessionHandle, SessionError> {
        let sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(key).cloned().ok_or_else(|| SessionError::NotFound(key.clone()))
    }

    /// Records `event_id` and reports whether it had already been seen. Requires the
    /// session guard, so check-and-set is atomic per session. Empty ids are never
    /// treated as duplicates. Once the window overflows, only the newest
    /// `dedupe_retain` ids are kept.
    pub fn is_duplicate(&self, session: &mut Session, event_id: &str) -> bool {
        if event_id.is_empty() {
            return false;
        }
        if session.processed_event_ids.contains(event_id) {
            return true;
        }

        session.processed_event_ids.insert(event_id.to_owned());
        session.event_order.push_back(event_id.to_owned());

        if session.event_order.len() > self.settings.dedupe_window {
            while session.event_order.len() > self.settings.dedupe_retain {
                if let Some(oldest) = session.event_order.pop_front() {
                    session.processed_event_ids.remove(&oldest);
                }
            }
        }

        false
    }

    pub fn append(&self, session: &mut Session, message: Message) {
        session.transcript.push(message);
    }

    pub fn history<'a>(&self, session: &'a Session) -> &'a [Message] {
        &session.transcript
    }

    /// Drops whole exchanges, oldest first, until the transcript fits the cap. Cuts
    /// happen only at user messages, so a tool-call group is never split and the
    /// leading system prompt is always kept. Returns the number of messages removed.
    pub fn enforce_retention(&self, session: &mut Session) -> usize {
        let has_system_prompt =
            matches!(session.transcript.first(), Some(first) if first.role == Role::System);
        let start = usize::from(has_system_prompt);
        let mut removed = 0;

        while session.transcript.len() > self.settings.max_transcript_messages {
            let next_turn = session.transcript[start..]
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, message)| message.role == Role::User)
                .map(|(offset, _)| start + offset);

            match next_turn {
                Some(cut) => {
                    removed += cut - start;
                    session.transcript.drain(start..cut);
                }
                None => break,
            }
        }

        if removed > 0 {
            debug!(
                event_name = "agent.session.trimmed",
                session = %session.key,
                removed,
                remaining = session.transcript.len(),
                "trimmed transcript to retention cap"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::{
        verify_tool_correlation, Message, Role, SessionKey, ToolCallRequest, ToolResult,
    };
    use serde_json::json;

    use super::{SessionError, SessionSettings, SessionStore};

    fn store(settings: SessionSettings) -> SessionStore {
        SessionStore::new("you are a test assistant", settings)
    }

    #[tokio::test]
    async fn new_session_starts_with_system_prompt() {
        let store = store(SessionSettings::default());
        let key = SessionKey::new("U1", "C1");

        let handle = store.get_or_create(&key);
        let session = handle.lock().await;

        assert_eq!(store.history(&session), &[Message::system("you are a test assistant")]);
        assert_eq!(session.key(), &key);
        assert_eq!(session.processed_event_count(), 0);
    }

    #[tokio::test]
    async fn same_pair_shares_one_session() {
        let store = store(SessionSettings::default());
        let first = store.get_or_create(&SessionKey::new("U1", "C1"));
        let second = store.get_or_create(&SessionKey::new("U1", "C1"));
        let other_channel = store.get_or_create(&SessionKey::new("U1", "C2"));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other_channel));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let store = store(SessionSettings::default());
        let key = SessionKey::new("ghost", "C0");

        assert!(matches!(store.get(&key), Err(SessionError::NotFound(missing)) if missing == key));
    }

    #[tokio::test]
    async fn duplicate_check_is_check_and_set() {
        let store = store(SessionSettings::default());
        let handle = store.get_or_create(&SessionKey::new("U1", "C1"));
        let mut session = handle.lock().await;

        assert!(!store.is_duplicate(&mut session, "Ev1"));
        assert!(store.is_duplicate(&mut session, "Ev1"));
        assert!(!store.is_duplicate(&mut session, "Ev2"));
        assert!(!store.is_duplicate(&mut session, ""));
        assert!(!store.is_duplicate(&mut session, ""));
        assert_eq!(session.processed_event_count(), 2);
    }

    #[tokio::test]
    async fn dedupe_window_prunes_oldest_ids() {
        let store = store(SessionSettings {
            dedupe_window: 4,
            dedupe_retain: 2,
            ..SessionSettings::default()
        });
        let handle = store.get_or_create(&SessionKey::new("U1", "C1"));
        let mut session = handle.lock().await;

        for id in ["e1", "e2", "e3", "e4"] {
            assert!(!store.is_duplicate(&mut session, id));
        }
        assert_eq!(session.processed_event_count(), 4);

        assert!(!store.is_duplicate(&mut session, "e5"));
        assert_eq!(session.processed_event_count(), 2);
        assert!(session.has_processed("e4"));
        assert!(session.has_processed("e5"));
        assert!(!session.has_processed("e1"));
    }

    #[tokio::test]
    async fn retention_drops_whole_exchanges_and_keeps_system_prompt() {
        let store =
            store(SessionSettings { max_transcript_messages: 6, ..SessionSettings::default() });
        let handle = store.get_or_create(&SessionKey::new("U1", "C1"));
        let mut session = handle.lock().await;

        let call = ToolCallRequest::new("call_1", "execute_sql_query", serde_json::Map::new());
        for message in [
            Message::user("first question"),
            Message::assistant_tool_calls(vec![call]),
            Message::tool(&ToolResult::success("call_1", json!({"rows": 1}))),
            Message::assistant("first answer"),
            Message::user("second question"),
            Message::assistant("second answer"),
            Message::user("third question"),
            Message::assistant("third answer"),
        ] {
            store.append(&mut session, message);
        }

        let removed = store.enforce_retention(&mut session);
        let history = store.history(&session);

        assert_eq!(removed, 4);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[1], Message::user("second question"));
        assert_eq!(verify_tool_correlation(history), Ok(()));
    }

    #[tokio::test]
    async fn retention_never_splits_the_current_exchange() {
        let store =
            store(SessionSettings { max_transcript_messages: 2, ..SessionSettings::default() });
        let handle = store.get_or_create(&SessionKey::new("U1", "C1"));
        let mut session = handle.lock().await;

        store.append(&mut session, Message::user("only question"));
        store.append(&mut session, Message::assistant("only answer"));

        assert_eq!(store.enforce_retention(&mut session), 0);
        assert_eq!(store.history(&session).len(), 3);
    }
}
