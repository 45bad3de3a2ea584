//! Commands every server ships with.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use switchboard_core::{CommandError, Request};

use crate::caches::MemoryCaches;
use crate::local::{CommandContext, CommandHandler, LocalRunner};
use crate::sessions::MemorySessions;
use crate::worker::{WorkerPool, WorkerTask};

pub const PING: &str = "system.ping";
pub const LOGIN: &str = "session.login";
pub const LOGOUT: &str = "session.logout";
pub const WHOAMI: &str = "session.whoami";
pub const CACHE_GET: &str = "cache.get";
pub const ECHO: &str = "system.echo";

/// Register the built-in local commands under any name not already taken.
/// Session commands need the in-memory provider, `cache.get` the in-memory
/// caches; each is skipped when its backend is absent.
pub fn register_local(
    runner: &mut LocalRunner,
    sessions: Option<Arc<MemorySessions>>,
    caches: Option<Arc<MemoryCaches>>,
) {
    register_missing(runner, PING, PingHandler);
    register_missing(runner, WHOAMI, WhoamiHandler);
    if let Some(sessions) = sessions {
        register_missing(
            runner,
            LOGIN,
            LoginHandler {
                sessions: Arc::clone(&sessions),
            },
        );
        register_missing(runner, LOGOUT, LogoutHandler { sessions });
    }
    if let Some(caches) = caches {
        register_missing(runner, CACHE_GET, CacheGetHandler { caches });
    }
}

/// Register the built-in worker tasks under any name not already taken.
pub fn register_worker(pool: &mut WorkerPool) {
    if !pool.contains(ECHO) {
        pool.register(ECHO, EchoTask);
    }
}

fn register_missing(runner: &mut LocalRunner, command: &str, handler: impl CommandHandler + 'static) {
    if !runner.contains(command) {
        runner.register(command, handler);
    }
}

pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn handle(&self, _request: &Request, _ctx: &CommandContext) -> Result<Value, CommandError> {
        Ok(json!({"pong": true}))
    }
}

/// Create a session for `params.user` and bind it to the caller.
pub struct LoginHandler {
    sessions: Arc<MemorySessions>,
}

#[async_trait]
impl CommandHandler for LoginHandler {
    async fn handle(&self, request: &Request, ctx: &CommandContext) -> Result<Value, CommandError> {
        let user = request
            .params()
            .get("user")
            .filter(|user| !user.is_null())
            .cloned()
            .ok_or_else(|| CommandError::InvalidParams("Missing required parameter: user".into()))?;
        let session = self
            .sessions
            .login(&ctx.connection, user)
            .ok_or_else(|| CommandError::Failed("connection closed".into()))?;
        serde_json::to_value(&session).map_err(|e| CommandError::Failed(e.to_string()))
    }
}

pub struct LogoutHandler {
    sessions: Arc<MemorySessions>,
}

#[async_trait]
impl CommandHandler for LogoutHandler {
    async fn handle(&self, request: &Request, ctx: &CommandContext) -> Result<Value, CommandError> {
        let destroyed = self.sessions.logout(&ctx.connection, request.session());
        Ok(json!({"loggedOut": destroyed}))
    }
}

pub struct WhoamiHandler;

#[async_trait]
impl CommandHandler for WhoamiHandler {
    async fn handle(&self, request: &Request, _ctx: &CommandContext) -> Result<Value, CommandError> {
        let user = request.session().map_or(Value::Null, |s| s.user.clone());
        Ok(json!({"user": user}))
    }
}

pub struct CacheGetHandler {
    caches: Arc<MemoryCaches>,
}

#[async_trait]
impl CommandHandler for CacheGetHandler {
    async fn handle(&self, request: &Request, _ctx: &CommandContext) -> Result<Value, CommandError> {
        let name = request.require_str("name").map_err(CommandError::InvalidParams)?;
        self.caches
            .get(name)
            .ok_or_else(|| CommandError::Failed(format!("unknown cache: {name}")))
    }
}

/// Worker task that answers with its own params.
pub struct EchoTask;

#[async_trait]
impl WorkerTask for EchoTask {
    async fn execute(&self, request: Request) -> Result<Value, CommandError> {
        Ok(Value::Object(request.params().clone()))
    }
}
