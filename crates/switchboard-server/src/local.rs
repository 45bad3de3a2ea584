//! In-process command table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{CommandError, ConnectionId, Request};
use tracing::debug;

/// Who invoked a local command, and under which correlation token.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandContext {
    pub connection: ConnectionId,
    pub uuid: Option<Value>,
    pub command: String,
}

/// Trait implemented by every locally dispatched command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, request: &Request, ctx: &CommandContext) -> Result<Value, CommandError>;
}

/// Registry mapping command names to in-process handlers.
pub struct LocalRunner {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one under the same name.
    pub fn register(&mut self, command: &str, handler: impl CommandHandler + 'static) {
        let _ = self.handlers.insert(command.to_owned(), Arc::new(handler));
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Registered command names (sorted).
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `command` in-process on behalf of `connection`.
    pub async fn run(
        &self,
        connection: &ConnectionId,
        uuid: Option<Value>,
        command: &str,
        request: Request,
    ) -> Result<Value, CommandError> {
        let Some(handler) = self.handlers.get(command) else {
            return Err(CommandError::UnrecognizedCommand(command.to_owned()));
        };
        debug!(connection = %connection, command, "running local command");
        let ctx = CommandContext {
            connection: connection.clone(),
            uuid,
            command: command.to_owned(),
        };
        handler.handle(&request, &ctx).await
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("commands", &self.commands())
            .finish()
    }
}
