//! # switchboard-core
//!
//! Shared vocabulary for the switchboard command-dispatch server: identities,
//! the error taxonomy, the per-message `Request`, sessions and the signals
//! that announce their lifecycle, and the collaborator traits the server
//! calls into.

pub mod errors;
pub mod hooks;
pub mod ids;
pub mod request;
pub mod session;
pub mod signals;

pub use errors::{CommandError, ConnectionError, SessionError, TransportError};
pub use ids::{ConnectionId, JobId, SessionId};
pub use request::Request;
pub use session::{Session, SessionContext, SessionProvider, SessionStore};
pub use signals::{SessionSignal, Signals};
