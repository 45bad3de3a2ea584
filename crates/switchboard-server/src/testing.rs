//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use switchboard_core::{
    CommandError, ConnectionId, Session, SessionContext, SessionError, SessionId, SessionProvider,
    SessionStore, Signals, TransportError,
};
use switchboard_settings::AppConfig;
use tokio::sync::mpsc;

use crate::app::{AppContext, HooksBuilder};
use crate::runner::{ConnectionHandle, Runner};
use crate::sessions::MemorySessionStore;
use crate::shutdown::TaskSupervisor;
use crate::transport::{FrameSource, RawConnection};
use crate::worker::ResultSink;

pub(crate) const REMOTE: &str = "127.0.0.1:40000";

/// Frame source replaying a fixed script, then reporting a normal close.
pub(crate) struct ScriptedFrames {
    frames: VecDeque<Result<String, TransportError>>,
    recvs: Arc<AtomicUsize>,
}

impl ScriptedFrames {
    pub(crate) fn new(frames: Vec<Result<String, TransportError>>) -> Self {
        Self {
            frames: frames.into(),
            recvs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `recv` calls made so far.
    pub(crate) fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.recvs)
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn recv(&mut self) -> Result<String, TransportError> {
        let _ = self.recvs.fetch_add(1, Ordering::SeqCst);
        self.frames
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::closed(1000, "bye")))
    }
}

pub(crate) fn raw_connection(frames: ScriptedFrames) -> (RawConnection, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(16);
    let remote: SocketAddr = REMOTE.parse().unwrap();
    (RawConnection::new(remote, Box::new(frames), tx), rx)
}

pub(crate) fn handle() -> ConnectionHandle {
    ConnectionHandle {
        id: ConnectionId::new(),
        path: "/".into(),
        remote: REMOTE.parse().unwrap(),
        session: None,
    }
}

pub(crate) fn test_app(config: AppConfig, sessions: Option<Arc<FixedSessions>>) -> Arc<AppContext> {
    let signals = Signals::default();
    let mut hooks = HooksBuilder::new();
    if let Some(sessions) = sessions {
        hooks = hooks.sessions(sessions);
    }
    let hooks = hooks.build(&config, &signals);
    Arc::new(AppContext {
        config,
        hooks,
        signals,
        supervisor: TaskSupervisor::new(),
    })
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    delivered: Mutex<Vec<(ConnectionId, Value)>>,
}

impl RecordingSink {
    pub(crate) fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub(crate) fn take(&self) -> Vec<(ConnectionId, Value)> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

impl ResultSink for RecordingSink {
    fn deliver(&self, connection: &ConnectionId, payload: &Value) -> bool {
        self.delivered.lock().push((connection.clone(), payload.clone()));
        true
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RunCall {
    pub connection: ConnectionHandle,
    pub uuid: Option<Value>,
    pub command: String,
    pub params: Map<String, Value>,
}

/// Runner that records every call and answers `{"ok": true}` unless told
/// to fail.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<RunCall>>,
    failure: Mutex<Option<CommandError>>,
}

impl RecordingRunner {
    pub(crate) fn calls(&self) -> Vec<RunCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn fail_with(&self, err: CommandError) {
        *self.failure.lock() = Some(err);
    }
}

#[async_trait]
impl Runner for RecordingRunner {
    async fn run(
        &self,
        connection: &ConnectionHandle,
        uuid: Option<Value>,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CommandError> {
        self.calls.lock().push(RunCall {
            connection: connection.clone(),
            uuid,
            command: command.to_owned(),
            params,
        });
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(json!({"ok": true})),
        }
    }
}

struct CountingStore {
    inner: MemorySessionStore,
    loads: AtomicUsize,
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn load(&self, id: &SessionId) -> Result<Session, SessionError> {
        let _ = self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(id).await
    }
}

/// Provider that hands every connection the same session id.
pub(crate) struct FixedSessions {
    store: Arc<CountingStore>,
    id: Option<SessionId>,
    gets: AtomicUsize,
    released: Mutex<Vec<ConnectionId>>,
}

impl FixedSessions {
    fn build(id: Option<SessionId>, session: Option<Session>) -> Self {
        let inner = MemorySessionStore::new();
        if let Some(session) = session {
            inner.insert(session);
        }
        Self {
            store: Arc::new(CountingStore {
                inner,
                loads: AtomicUsize::new(0),
            }),
            id,
            gets: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn anonymous() -> Self {
        Self::build(None, None)
    }

    pub(crate) fn with_user(user: &str) -> Self {
        let session = Session::new(SessionId::new(), json!(user));
        Self::build(Some(session.id.clone()), Some(session))
    }

    /// An id the store does not know.
    pub(crate) fn dangling(id: SessionId) -> Self {
        Self::build(Some(id), None)
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn loads(&self) -> usize {
        self.store.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> Vec<ConnectionId> {
        self.released.lock().clone()
    }
}

impl SessionProvider for FixedSessions {
    fn get(&self, _ctx: &SessionContext) -> (Arc<dyn SessionStore>, Option<SessionId>) {
        let _ = self.gets.fetch_add(1, Ordering::SeqCst);
        let store: Arc<dyn SessionStore> = self.store.clone();
        (store, self.id.clone())
    }

    fn release(&self, connection: &ConnectionId) {
        self.released.lock().push(connection.clone());
    }
}
