//! In-memory session provider.
//!
//! A connection's session id comes from its explicit binding when one
//! exists (set by login, cleared by logout), otherwise from the `session`
//! query parameter of the path it connected on.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use switchboard_core::{
    ConnectionId, Session, SessionContext, SessionError, SessionId, SessionProvider,
    SessionSignal, SessionStore, Signals,
};
use tracing::debug;

/// Sessions keyed by id.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        let _ = self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }
}

/// How a live connection finds its session id.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Binding {
    /// Nothing bound yet; fall back to the `session` query parameter.
    Path,
    Bound(SessionId),
    /// Logged out; anonymous regardless of the path.
    Anonymous,
}

pub struct MemorySessions {
    store: Arc<MemorySessionStore>,
    /// One entry per attached connection, removed on release.
    bindings: DashMap<ConnectionId, Binding>,
    signals: Signals,
}

impl MemorySessions {
    pub fn new(signals: Signals) -> Self {
        Self {
            store: Arc::new(MemorySessionStore::new()),
            bindings: DashMap::new(),
            signals,
        }
    }

    pub fn store(&self) -> &Arc<MemorySessionStore> {
        &self.store
    }

    /// Connections currently holding a binding.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Create a session for `user` and bind it to `connection`. Returns
    /// `None` if the connection is no longer attached.
    pub fn login(&self, connection: &ConnectionId, user: Value) -> Option<Session> {
        // The entry guard keeps a concurrent release out until the binding is set.
        let Some(mut binding) = self.bindings.get_mut(connection) else {
            debug!(connection = %connection, "login for detached connection ignored");
            return None;
        };
        let session = Session::new(SessionId::new(), user);
        self.store.insert(session.clone());
        *binding = Binding::Bound(session.id.clone());
        drop(binding);

        let _ = self.signals.emit(SessionSignal::Created {
            session: session.clone(),
            connection: connection.clone(),
        });
        Some(session)
    }

    /// Destroy `session` and leave `connection` anonymous. Returns `false`
    /// when there was nothing to destroy.
    pub fn logout(&self, connection: &ConnectionId, session: Option<&Session>) -> bool {
        let Some(session) = session else {
            return false;
        };
        let _ = self.store.remove(&session.id);
        match self.bindings.get_mut(connection) {
            Some(mut binding) => *binding = Binding::Anonymous,
            None => return true,
        }
        let _ = self.signals.emit(SessionSignal::Destroyed {
            connection: connection.clone(),
        });
        true
    }

    fn current(&self, connection: &ConnectionId, path: &str) -> Option<SessionId> {
        match self.bindings.get(connection).map(|b| b.value().clone()) {
            Some(Binding::Bound(id)) => Some(id),
            Some(Binding::Anonymous) => None,
            Some(Binding::Path) | None => session_param(path),
        }
    }
}

impl SessionProvider for MemorySessions {
    fn get(&self, ctx: &SessionContext) -> (Arc<dyn SessionStore>, Option<SessionId>) {
        let store: Arc<dyn SessionStore> = self.store.clone();
        (store, self.current(&ctx.connection, &ctx.path))
    }

    fn attach(&self, connection: &ConnectionId) {
        let _ = self.bindings.entry(connection.clone()).or_insert(Binding::Path);
    }

    fn release(&self, connection: &ConnectionId) {
        if self.bindings.remove(connection).is_some() {
            debug!(connection = %connection, "released session binding");
        }
    }
}

impl std::fmt::Debug for MemorySessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessions")
            .field("sessions", &self.store.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Value of the `session` query parameter, if any.
fn session_param(path: &str) -> Option<SessionId> {
    let (_, query) = path.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == "session" && !value.is_empty())
        .map(|(_, value)| SessionId::from_raw(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(connection: &ConnectionId, path: &str) -> SessionContext {
        SessionContext {
            connection: connection.clone(),
            path: path.into(),
        }
    }

    #[test]
    fn session_param_parsing() {
        assert_eq!(session_param("/"), None);
        assert_eq!(session_param("/?other=1"), None);
        assert_eq!(session_param("/?session="), None);
        assert_eq!(
            session_param("/ws?a=1&session=sess_x"),
            Some(SessionId::from_raw("sess_x"))
        );
    }

    #[tokio::test]
    async fn store_load_missing_is_not_found() {
        let store = MemorySessionStore::new();
        let id = SessionId::from_raw("sess_missing");
        assert_eq!(store.load(&id).await.unwrap_err(), SessionError::NotFound(id));
    }

    #[test]
    fn anonymous_without_binding_or_param() {
        let sessions = MemorySessions::new(Signals::default());
        let (_, id) = sessions.get(&ctx(&ConnectionId::new(), "/"));
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn query_param_resolves_through_store() {
        let sessions = MemorySessions::new(Signals::default());
        let session = Session::new(SessionId::from_raw("sess_q"), json!("alice"));
        sessions.store().insert(session.clone());

        let (store, id) = sessions.get(&ctx(&ConnectionId::new(), "/?session=sess_q"));
        assert_eq!(store.load(&id.unwrap()).await.unwrap(), session);
    }

    #[tokio::test]
    async fn login_binds_and_signals() {
        let signals = Signals::default();
        let mut rx = signals.listen();
        let sessions = MemorySessions::new(signals);
        let conn = ConnectionId::new();
        sessions.attach(&conn);

        let session = sessions.login(&conn, json!({"name": "bob"})).unwrap();
        let (_, id) = sessions.get(&ctx(&conn, "/"));
        assert_eq!(id, Some(session.id.clone()));

        match rx.recv().await.unwrap() {
            SessionSignal::Created { session: s, connection } => {
                assert_eq!(s, session);
                assert_eq!(connection, conn);
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[tokio::test]
    async fn logout_overrides_query_param() {
        let signals = Signals::default();
        let mut rx = signals.listen();
        let sessions = MemorySessions::new(signals);
        let session = Session::new(SessionId::from_raw("sess_q"), json!("alice"));
        sessions.store().insert(session.clone());
        let conn = ConnectionId::new();
        sessions.attach(&conn);

        assert!(sessions.logout(&conn, Some(&session)));
        assert!(sessions.store().is_empty());

        let (_, id) = sessions.get(&ctx(&conn, "/?session=sess_q"));
        assert!(id.is_none());
        assert!(matches!(rx.recv().await.unwrap(), SessionSignal::Destroyed { .. }));
    }

    #[test]
    fn logout_when_anonymous_is_noop() {
        let sessions = MemorySessions::new(Signals::default());
        assert!(!sessions.logout(&ConnectionId::new(), None));
    }

    #[test]
    fn release_forgets_binding() {
        let sessions = MemorySessions::new(Signals::default());
        let conn = ConnectionId::new();
        sessions.attach(&conn);
        let _ = sessions.login(&conn, json!("carol")).unwrap();
        sessions.release(&conn);
        let (_, id) = sessions.get(&ctx(&conn, "/"));
        assert!(id.is_none());
        assert_eq!(sessions.binding_count(), 0);
    }

    #[tokio::test]
    async fn login_after_release_binds_nothing() {
        let signals = Signals::default();
        let mut rx = signals.listen();
        let sessions = MemorySessions::new(signals);
        let conn = ConnectionId::new();
        sessions.attach(&conn);
        sessions.release(&conn);

        assert!(sessions.login(&conn, json!("dave")).is_none());
        assert_eq!(sessions.binding_count(), 0);
        assert!(sessions.store().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn attach_starts_from_query_param() {
        let sessions = MemorySessions::new(Signals::default());
        let conn = ConnectionId::new();
        sessions.attach(&conn);
        let (_, id) = sessions.get(&ctx(&conn, "/?session=sess_q"));
        assert_eq!(id, Some(SessionId::from_raw("sess_q")));
        assert_eq!(sessions.binding_count(), 1);
    }
}
