//! Sessions and the collaborator traits used to resolve them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::ids::{ConnectionId, SessionId};

/// An authenticated session. Opaque to the dispatch core apart from being
/// serialisable into the connect acknowledgement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, user: serde_json::Value) -> Self {
        Self {
            id,
            user,
            created_at: Utc::now(),
        }
    }
}

/// What a session provider may inspect to find the current session id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub connection: ConnectionId,
    /// Route the client connected on, including any query string.
    pub path: String,
}

/// Backing store for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Session, SessionError>;
}

/// Resolves the session id in effect for a connection, together with the
/// store that can load it. `None` means the connection runs anonymously.
pub trait SessionProvider: Send + Sync {
    fn get(&self, ctx: &SessionContext) -> (Arc<dyn SessionStore>, Option<SessionId>);

    /// A connection was registered and may now hold per-connection state.
    fn attach(&self, _connection: &ConnectionId) {}

    /// Forget any per-connection state once the connection is gone.
    fn release(&self, _connection: &ConnectionId) {}
}
