//! Per-connection protocol loop.
//!
//! `CREATED -> handshake -> RECEIVING (receive, parse, log, resolve session,
//! dispatch) -> CLOSED`. Commands are spawned off the loop so a slow command
//! never holds up the frames behind it; their replies may therefore arrive
//! out of order.

use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use switchboard_core::{ConnectionError, ConnectionId, Session, SessionContext};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::reply::Reply;
use crate::runner::ConnectionHandle;
use crate::socket::SocketWrapper;
use crate::transport::RawConnection;

pub struct Connection {
    socket: Arc<SocketWrapper>,
    raw: RawConnection,
    path: String,
}

impl Connection {
    pub fn new(socket: Arc<SocketWrapper>, raw: RawConnection, path: impl Into<String>) -> Self {
        Self {
            socket,
            raw,
            path: path.into(),
        }
    }

    /// Registry key and worker correlation token. Fixed for the life of the
    /// underlying transport connection.
    pub fn identity(&self) -> &ConnectionId {
        self.raw.id()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.raw.remote_address().ip()
    }

    pub fn remote_port(&self) -> u16 {
        self.raw.remote_address().port()
    }

    pub(crate) fn raw(&self) -> &RawConnection {
        &self.raw
    }

    /// Decode one text frame. Anything but a JSON object is malformed.
    pub fn parse_request(&self, frame: &str) -> Result<Map<String, Value>, ConnectionError> {
        match serde_json::from_str::<Value>(frame)? {
            Value::Object(map) => Ok(map),
            other => Err(ConnectionError::MalformedRequest(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn log_request(&self, parsed: &Map<String, Value>) {
        debug!(
            target: "app.socket.recv",
            ip = %self.remote_ip(),
            port = self.remote_port(),
            request = %serde_json::to_string(parsed).unwrap_or_default(),
            "recv"
        );
    }

    /// Spawn the command named in `parsed`; its reply goes back to this
    /// connection when it finishes. Does not wait for it.
    pub fn handle_request(&self, session: Option<Session>, mut parsed: Map<String, Value>) -> JoinHandle<()> {
        let uuid = parsed.remove("uuid");
        let command = parsed
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let params = match parsed.remove("params") {
            Some(Value::Object(params)) => params,
            _ => Map::new(),
        };

        let handle = ConnectionHandle {
            id: self.identity().clone(),
            path: self.path.clone(),
            remote: self.raw.remote_address(),
            session,
        };
        let socket = Arc::clone(&self.socket);
        let runner = socket.runner();
        self.socket.app().supervisor.spawn("command", async move {
            let outcome = runner.run(&handle, uuid.clone(), &command, params).await;
            let reply = Reply::from_outcome(uuid, command.as_str(), &outcome);
            let _ = socket.send(&reply.to_value(), std::slice::from_ref(&handle.id));
            outcome.map(|_| ())
        })
    }

    /// Resolve the session in effect for this connection, if any.
    pub async fn handle_session(&self) -> Result<Option<Session>, ConnectionError> {
        let ctx = SessionContext {
            connection: self.identity().clone(),
            path: self.path.clone(),
        };
        let (store, id) = self.socket.app().hooks.sessions.get(&ctx);
        match id {
            Some(id) => Ok(Some(store.load(&id).await?)),
            None => Ok(None),
        }
    }

    /// Handshake: acknowledge an authenticated connection, then validate it.
    pub async fn handle_connection(&self) -> Result<(), ConnectionError> {
        if let Some(session) = self.handle_session().await? {
            let ack = json!({"user": session, "msg": "connected"});
            let _ = self.socket.send(&ack, std::slice::from_ref(self.identity()));
        }
        self.validate_connection()
    }

    /// Refuse connections beyond the configured limit.
    pub fn validate_connection(&self) -> Result<(), ConnectionError> {
        let limit = self.socket.app().config.max_connections;
        let live = self.socket.connection_count();
        if live > limit {
            return Err(ConnectionError::Rejected(format!(
                "server at capacity ({live} of {limit} connections)"
            )));
        }
        Ok(())
    }

    /// Run the handshake, then the receive loop until the transport closes
    /// or the server shuts down. Any other failure ends the loop with an error.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.handle_connection().await?;

        let token = self.socket.app().supervisor.token();
        loop {
            let frame = tokio::select! {
                () = token.cancelled() => return Ok(()),
                frame = self.raw.recv() => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) if e.is_closed() => {
                    debug!(connection = %self.identity(), reason = %e, "transport closed");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            let parsed = self.parse_request(&frame)?;
            self.log_request(&parsed);
            let session = self.handle_session().await?;
            let _ = self.handle_request(session, parsed);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", self.identity())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
