//! Session lifecycle signals.
//!
//! The session collaborator announces sessions being created for and
//! destroyed on a connection; the socket layer listens and updates its
//! connection registry. Delivery is a `tokio::sync::broadcast` fan-out.

use tokio::sync::broadcast;

use crate::ids::ConnectionId;
use crate::session::Session;

pub const SESSION_CREATE: &str = "auth.session.create";
pub const SESSION_DESTROY: &str = "auth.session.destroy";

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionSignal {
    Created {
        session: Session,
        connection: ConnectionId,
    },
    Destroyed {
        connection: ConnectionId,
    },
}

impl SessionSignal {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Created { .. } => SESSION_CREATE,
            Self::Destroyed { .. } => SESSION_DESTROY,
        }
    }

    pub fn connection(&self) -> &ConnectionId {
        match self {
            Self::Created { connection, .. } | Self::Destroyed { connection } => connection,
        }
    }
}

/// Broadcast source for [`SessionSignal`]s. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Signals {
    tx: broadcast::Sender<SessionSignal>,
}

impl Signals {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a signal. Returns how many listeners received it.
    pub fn emit(&self, signal: SessionSignal) -> usize {
        tracing::debug!(topic = signal.topic(), connection = %signal.connection(), "session signal");
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn listen(&self) -> broadcast::Receiver<SessionSignal> {
        self.tx.subscribe()
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
