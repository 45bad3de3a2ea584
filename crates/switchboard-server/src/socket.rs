//! Connection registry and server entry point.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use switchboard_core::{ConnectionError, ConnectionId, Session, SessionSignal};
use switchboard_settings::AppConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::connection::Connection;
use crate::runner::Runner;
use crate::transport::{self, Outbound, RawConnection};
use crate::worker::ResultSink;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub path: String,
}

/// Registry record for one live connection.
///
/// Created with `connection` and `socket` set. A session-create signal
/// replaces the whole record with one holding only `session`; a
/// session-destroy signal resets it to empty. Neither removes the key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionMeta {
    pub connection: Option<ConnectionInfo>,
    pub socket: Option<SocketAddr>,
    pub session: Option<Session>,
}

impl ConnectionMeta {
    pub fn is_empty(&self) -> bool {
        self.connection.is_none() && self.socket.is_none() && self.session.is_none()
    }
}

pub struct SocketWrapper {
    app: Arc<AppContext>,
    runner: Arc<dyn Runner>,
    connections: DashMap<ConnectionId, ConnectionMeta>,
    /// Outbound queues, present for exactly the keys in `connections`.
    routes: DashMap<ConnectionId, Outbound>,
}

impl SocketWrapper {
    /// Build the wrapper and subscribe it to session signals.
    pub fn new(app: Arc<AppContext>, runner: Arc<dyn Runner>) -> Arc<Self> {
        let socket = Arc::new(Self {
            app,
            runner,
            connections: DashMap::new(),
            routes: DashMap::new(),
        });
        socket.listen();
        socket
    }

    pub fn app(&self) -> &Arc<AppContext> {
        &self.app
    }

    pub fn runner(&self) -> Arc<dyn Runner> {
        Arc::clone(&self.runner)
    }

    /// Route session signals to the registry handlers until shutdown.
    fn listen(self: &Arc<Self>) {
        let mut rx = self.app.signals.listen();
        let socket = Arc::downgrade(self);
        let token = self.app.supervisor.token();
        let _ = self.app.supervisor.spawn("session-signals", async move {
            loop {
                let signal = tokio::select! {
                    () = token.cancelled() => break,
                    signal = rx.recv() => signal,
                };
                match signal {
                    Ok(signal) => {
                        let Some(socket) = socket.upgrade() else { break };
                        let topic = signal.topic();
                        match signal {
                            SessionSignal::Created {
                                session,
                                connection,
                            } => socket.on_session_create(topic, session, &connection),
                            SessionSignal::Destroyed { connection } => {
                                socket.on_session_destroy(topic, &connection);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session signal listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            Ok::<(), Infallible>(())
        });
    }

    pub fn log(&self, parts: &[&str]) {
        info!(target: "app.socket", "app.socket: {}", parts.join(" "));
    }

    /// Bind the configured address and start accepting connections.
    pub async fn serve(self: &Arc<Self>) -> std::io::Result<ServerHandle> {
        let listener = bind(&self.app.config).await?;
        self.serve_on(listener)
    }

    /// Start accepting on an already bound listener.
    pub fn serve_on(self: &Arc<Self>, listener: TcpListener) -> std::io::Result<ServerHandle> {
        let local_addr = listener.local_addr()?;
        self.log(&["listening", &local_addr.to_string()]);

        let router = transport::router(Arc::clone(self));
        let token = self.app.supervisor.token();
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        });

        Ok(ServerHandle {
            local_addr,
            socket: Arc::clone(self),
            task,
        })
    }

    /// Supervise one accepted connection from registration to removal.
    ///
    /// A transport close is the normal end and is swallowed. Other failures
    /// are returned after the registry entry is gone.
    pub async fn pipe(self: &Arc<Self>, raw: RawConnection, path: impl Into<String>) -> Result<(), ConnectionError> {
        let mut connection = self.connect(raw, path);
        self.register(&connection);

        let id = connection.identity().clone();
        let result = connection.connect().await;
        let _ = self.disconnect(&id);
        match result {
            Err(e) if e.is_closed() => Ok(()),
            other => other,
        }
    }

    /// Wrap a raw transport connection.
    pub fn connect(self: &Arc<Self>, raw: RawConnection, path: impl Into<String>) -> Connection {
        Connection::new(Arc::clone(self), raw, path)
    }

    pub(crate) fn register(&self, connection: &Connection) {
        let id = connection.identity().clone();
        let remote = connection.raw().remote_address();
        self.log(&["connect", id.as_str(), &remote.to_string(), connection.path()]);

        let meta = ConnectionMeta {
            connection: Some(ConnectionInfo {
                id: id.clone(),
                path: connection.path().to_owned(),
            }),
            socket: Some(remote),
            session: None,
        };
        let _ = self.routes.insert(id.clone(), connection.raw().outbound().clone());
        let _ = self.connections.insert(id.clone(), meta);
        self.app.hooks.sessions.attach(&id);
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        self.log(&["disconnect", id.as_str()]);
        let _ = self.routes.remove(id);
        let removed = self.connections.remove(id).is_some();
        if removed {
            self.app.hooks.sessions.release(id);
        }
        removed
    }

    pub fn on_session_create(&self, topic: &str, session: Session, connection: &ConnectionId) {
        match self.connections.get_mut(connection) {
            Some(mut meta) => {
                *meta = ConnectionMeta {
                    session: Some(session),
                    ..ConnectionMeta::default()
                };
            }
            None => debug!(topic, connection = %connection, "session signal for unknown connection"),
        }
    }

    pub fn on_session_destroy(&self, topic: &str, connection: &ConnectionId) {
        match self.connections.get_mut(connection) {
            Some(mut meta) => *meta = ConnectionMeta::default(),
            None => debug!(topic, connection = %connection, "session signal for unknown connection"),
        }
    }

    /// Send `payload` to each target. Returns how many accepted it.
    pub fn send(&self, payload: &Value, targets: &[ConnectionId]) -> usize {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return 0;
            }
        };

        let mut sent = 0;
        for target in targets {
            let Some(route) = self.routes.get(target) else {
                debug!(connection = %target, "send to unknown connection");
                continue;
            };
            match route.try_send(text.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %target, "send queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %target, "writer gone, dropping message");
                }
            }
        }
        sent
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn metadata(&self, id: &ConnectionId) -> Option<ConnectionMeta> {
        self.connections.get(id).map(|meta| meta.value().clone())
    }
}

impl ResultSink for SocketWrapper {
    fn deliver(&self, connection: &ConnectionId, payload: &Value) -> bool {
        self.send(payload, std::slice::from_ref(connection)) == 1
    }
}

/// Bind the configured listen address.
pub async fn bind(config: &AppConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind(config.bind_addr()).await
}

/// Handle to a running server.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub socket: Arc<SocketWrapper>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Wait for the accept loop to stop.
    pub async fn join(self) -> std::io::Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        eventually, raw_connection, test_app, FixedSessions, RecordingRunner, ScriptedFrames,
    };
    use crate::app::HooksBuilder;
    use crate::builtins;
    use crate::local::LocalRunner;
    use crate::runner::CommandRouter;
    use crate::sessions::MemorySessions;
    use crate::shutdown::TaskSupervisor;
    use serde_json::json;
    use std::time::Duration;
    use switchboard_core::{SessionId, Signals, TransportError};
    use tokio::sync::mpsc;

    fn wrapper() -> Arc<SocketWrapper> {
        wrapper_with(FixedSessions::anonymous()).0
    }

    fn wrapper_with(sessions: FixedSessions) -> (Arc<SocketWrapper>, Arc<FixedSessions>, Arc<RecordingRunner>) {
        let sessions = Arc::new(sessions);
        let runner = Arc::new(RecordingRunner::default());
        let app = test_app(AppConfig::default(), Some(sessions.clone()));
        (SocketWrapper::new(app, runner.clone()), sessions, runner)
    }

    fn register(socket: &Arc<SocketWrapper>) -> (ConnectionId, mpsc::Receiver<String>) {
        let (raw, rx) = raw_connection(ScriptedFrames::new(Vec::new()));
        let connection = socket.connect(raw, "/p");
        socket.register(&connection);
        (connection.identity().clone(), rx)
    }

    fn session(user: &str) -> Session {
        Session::new(SessionId::new(), json!(user))
    }

    #[tokio::test]
    async fn register_records_connection_and_socket() {
        let socket = wrapper();
        let (id, _rx) = register(&socket);

        let meta = socket.metadata(&id).unwrap();
        assert_eq!(meta.connection.unwrap().id, id);
        assert_eq!(meta.socket.unwrap().port(), 40000);
        assert!(meta.session.is_none());
        assert_eq!(socket.connection_count(), 1);
    }

    #[tokio::test]
    async fn session_create_replaces_record() {
        let socket = wrapper();
        let (id, _rx) = register(&socket);
        let s = session("S");

        socket.on_session_create("auth.session.create", s.clone(), &id);

        let meta = socket.metadata(&id).unwrap();
        assert_eq!(
            meta,
            ConnectionMeta {
                session: Some(s),
                ..ConnectionMeta::default()
            }
        );
    }

    #[tokio::test]
    async fn session_destroy_resets_but_keeps_key() {
        let socket = wrapper();
        let (id, _rx) = register(&socket);

        socket.on_session_create("auth.session.create", session("S"), &id);
        socket.on_session_destroy("auth.session.destroy", &id);

        assert!(socket.contains(&id));
        assert!(socket.metadata(&id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_signal_for_unknown_connection_creates_nothing() {
        let socket = wrapper();
        socket.on_session_create("auth.session.create", session("S"), &ConnectionId::new());
        socket.on_session_destroy("auth.session.destroy", &ConnectionId::new());
        assert_eq!(socket.connection_count(), 0);
    }

    #[tokio::test]
    async fn replies_still_route_after_session_create() {
        let socket = wrapper();
        let (id, mut rx) = register(&socket);
        socket.on_session_create("auth.session.create", session("S"), &id);

        assert_eq!(socket.send(&json!({"n": 1}), &[id]), 1);
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn signals_reach_registry() {
        let socket = wrapper();
        let (id, _rx) = register(&socket);
        let signals = socket.app().signals.clone();

        let s = session("S");
        let _ = signals.emit(SessionSignal::Created {
            session: s.clone(),
            connection: id.clone(),
        });
        eventually(|| socket.metadata(&id).and_then(|m| m.session).as_ref() == Some(&s)).await;

        let _ = signals.emit(SessionSignal::Destroyed {
            connection: id.clone(),
        });
        eventually(|| socket.metadata(&id).is_some_and(|m| m.is_empty())).await;
    }

    #[tokio::test]
    async fn disconnect_removes_only_that_key() {
        let socket = wrapper();
        let (a, _ra) = register(&socket);
        let (b, _rb) = register(&socket);
        socket.on_session_create("auth.session.create", session("S"), &b);
        let before = socket.metadata(&b);

        assert!(socket.disconnect(&a));
        assert!(!socket.contains(&a));
        assert_eq!(socket.metadata(&b), before);

        assert!(!socket.disconnect(&a));
        assert_eq!(socket.connection_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_releases_session_binding() {
        let (socket, sessions, _) = wrapper_with(FixedSessions::anonymous());
        let (id, _rx) = register(&socket);
        let _ = socket.disconnect(&id);
        let _ = socket.disconnect(&id);
        assert_eq!(sessions.released(), vec![id]);
    }

    #[tokio::test]
    async fn send_targets_only_named_connections() {
        let socket = wrapper();
        let (a, mut ra) = register(&socket);
        let (b, mut rb) = register(&socket);
        let (_c, mut rc) = register(&socket);

        let sent = socket.send(&json!("hi"), &[a, b, ConnectionId::new()]);
        assert_eq!(sent, 2);
        assert_eq!(ra.recv().await.unwrap(), r#""hi""#);
        assert_eq!(rb.recv().await.unwrap(), r#""hi""#);
        assert!(rc.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_full_queue_drops() {
        let socket = wrapper();
        let (tx, _rx) = mpsc::channel(1);
        let raw = RawConnection::new(
            "127.0.0.1:1".parse().unwrap(),
            Box::new(ScriptedFrames::new(Vec::new())),
            tx,
        );
        let connection = socket.connect(raw, "/");
        socket.register(&connection);
        let id = connection.identity().clone();

        assert_eq!(socket.send(&json!(1), std::slice::from_ref(&id)), 1);
        assert_eq!(socket.send(&json!(2), std::slice::from_ref(&id)), 0);
    }

    #[tokio::test]
    async fn pipe_cleans_up_after_close() {
        let (socket, _, runner) = wrapper_with(FixedSessions::anonymous());
        let (raw, _rx) = raw_connection(ScriptedFrames::new(vec![Ok(
            r#"{"uuid": "U1", "command": "FOO", "params": {"a": 1}}"#.into(),
        )]));
        let id = raw.id().clone();

        socket.pipe(raw, "/p").await.unwrap();

        assert!(!socket.contains(&id));
        eventually(|| runner.calls().len() == 1).await;
        assert_eq!(runner.calls()[0].connection.id, id);
    }

    #[tokio::test]
    async fn pipe_cleans_up_and_propagates_other_failures() {
        let socket = wrapper();
        let (raw, _rx) = raw_connection(ScriptedFrames::new(vec![Ok("nope".into())]));
        let id = raw.id().clone();

        let err = socket.pipe(raw, "/").await.unwrap_err();
        assert!(matches!(err, ConnectionError::MalformedRequest(_)));
        assert!(!socket.contains(&id));
    }

    #[tokio::test]
    async fn pipe_swallows_transport_close_error() {
        let socket = wrapper();
        let (raw, _rx) = raw_connection(ScriptedFrames::new(vec![Err(TransportError::closed(
            1001, "going away",
        ))]));
        socket.pipe(raw, "/").await.unwrap();
        assert_eq!(socket.connection_count(), 0);
    }

    #[tokio::test]
    async fn pipe_future_can_move_across_threads() {
        fn assert_send<T: Send>(_: &T) {}
        let socket = wrapper();
        let (raw, _rx) = raw_connection(ScriptedFrames::new(Vec::new()));
        let fut = socket.pipe(raw, "/");
        assert_send(&fut);
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn login_racing_close_leaves_no_binding() {
        let signals = Signals::default();
        let sessions = Arc::new(MemorySessions::new(signals.clone()));
        let mut local = LocalRunner::new();
        builtins::register_local(&mut local, Some(Arc::clone(&sessions)), None);
        let config = AppConfig::default();
        let hooks = HooksBuilder::new()
            .local(local)
            .sessions(sessions.clone())
            .build(&config, &signals);
        let app = Arc::new(AppContext {
            config,
            hooks,
            signals,
            supervisor: TaskSupervisor::new(),
        });
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&app.hooks.local),
            Arc::clone(&app.hooks.worker),
        ));
        let socket = SocketWrapper::new(Arc::clone(&app), router);
        let (raw, _rx) = raw_connection(ScriptedFrames::new(vec![Ok(
            r#"{"uuid": "U1", "command": "session.login", "params": {"user": "alice"}}"#.into(),
        )]));

        socket.pipe(raw, "/").await.unwrap();
        assert!(app.supervisor.shutdown(Some(Duration::from_secs(5))).await);

        assert_eq!(sessions.binding_count(), 0);
    }

    #[tokio::test]
    async fn worker_results_deliver_through_sink() {
        let socket = wrapper();
        let (id, mut rx) = register(&socket);
        assert!(socket.deliver(&id, &json!({"done": true})));
        assert_eq!(rx.recv().await.unwrap(), r#"{"done":true}"#);
        let _ = socket.disconnect(&id);
        assert!(!socket.deliver(&id, &json!({"done": true})));
    }
}
