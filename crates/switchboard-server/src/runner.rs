//! Command routing between the worker pool and the local command table.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use switchboard_core::{CommandError, ConnectionId, JobId, Request, Session};

use crate::local::LocalRunner;
use crate::worker::{Job, WorkerPool};

/// What a dispatched command knows about the connection that sent it.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub path: String,
    pub remote: SocketAddr,
    pub session: Option<Session>,
}

/// Executes one command on behalf of a connection.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        connection: &ConnectionHandle,
        uuid: Option<Value>,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CommandError>;
}

/// Worker table first, then the local table. Anything else is rejected
/// before either side runs.
pub struct CommandRouter {
    local: Arc<LocalRunner>,
    worker: Arc<WorkerPool>,
}

impl CommandRouter {
    pub fn new(local: Arc<LocalRunner>, worker: Arc<WorkerPool>) -> Self {
        Self { local, worker }
    }

    /// Queue `command` on the pool. The eventual reply is routed back to the
    /// connection by its identity; the immediate answer acknowledges the job.
    pub async fn run_worker(
        &self,
        command: &str,
        connection: &ConnectionHandle,
        uuid: Option<Value>,
        params: Map<String, Value>,
    ) -> Result<Value, CommandError> {
        let job = Job {
            id: JobId::new(),
            connection: connection.id.clone(),
            uuid,
            command: command.to_owned(),
            request: Request::new(connection.session.clone(), params, Vec::new()),
        };
        let id = job.id.clone();
        self.worker.submit(job).await?;
        tracing::debug!(connection = %connection.id, job = %id, command, "queued worker job");
        Ok(json!({"queued": true, "job": id}))
    }
}

#[async_trait]
impl Runner for CommandRouter {
    async fn run(
        &self,
        connection: &ConnectionHandle,
        uuid: Option<Value>,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CommandError> {
        if self.worker.contains(command) {
            return self.run_worker(command, connection, uuid, params).await;
        }
        if self.local.contains(command) {
            let request = Request::new(connection.session.clone(), params, Vec::new());
            return self.local.run(&connection.id, uuid, command, request).await;
        }
        Err(CommandError::UnrecognizedCommand(command.to_owned()))
    }
}
