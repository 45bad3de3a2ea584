//! Realtime command-dispatch server.
//!
//! Clients hold a WebSocket open and send JSON commands
//! (`{uuid, command, params}`). Each connection resolves its session, routes
//! the command to the in-process table or the worker pool, and receives the
//! reply on the same socket.

pub mod app;
pub mod builtins;
pub mod caches;
pub mod connection;
pub mod local;
pub mod reply;
pub mod runner;
pub mod sessions;
pub mod shutdown;
pub mod socket;
pub mod transport;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{AppContext, AppError, Application, Hooks, HooksBuilder};
pub use connection::Connection;
pub use local::{CommandContext, CommandHandler, LocalRunner};
pub use reply::{Reply, ReplyError};
pub use runner::{CommandRouter, ConnectionHandle, Runner};
pub use sessions::{MemorySessionStore, MemorySessions};
pub use shutdown::TaskSupervisor;
pub use socket::{ConnectionInfo, ConnectionMeta, ServerHandle, SocketWrapper};
pub use transport::{FrameSource, RawConnection};
pub use worker::{Job, ResultSink, WorkerPool, WorkerTask};
