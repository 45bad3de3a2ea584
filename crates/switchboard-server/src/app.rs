//! Composition root: configuration, collaborator hooks, startup sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchboard_core::hooks::CachePrimer;
use switchboard_core::{SessionProvider, Signals};
use switchboard_settings::AppConfig;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::builtins;
use crate::caches::MemoryCaches;
use crate::local::LocalRunner;
use crate::runner::CommandRouter;
use crate::sessions::MemorySessions;
use crate::shutdown::TaskSupervisor;
use crate::socket::{ServerHandle, SocketWrapper};
use crate::worker::{ResultSink, WorkerPool};

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("cache priming failed: {0}")]
    Cache(String),
    #[error("unknown worker task: {0}")]
    UnknownWorkerTask(String),
    #[error("command registered both locally and on the worker pool: {0}")]
    AmbiguousCommand(String),
    #[error("application is already serving")]
    AlreadyServing,
}

/// The collaborators the server is wired with.
pub struct Hooks {
    /// `tasks.local`
    pub local: Arc<LocalRunner>,
    /// `tasks.worker` and the worker lifecycle.
    pub worker: Arc<WorkerPool>,
    /// `auth.sessions`
    pub sessions: Arc<dyn SessionProvider>,
    pub caches: Arc<dyn CachePrimer>,
}

/// Collects externally supplied hooks; anything left unset gets the
/// in-memory default when built.
#[derive(Default)]
pub struct HooksBuilder {
    local: Option<LocalRunner>,
    worker: Option<WorkerPool>,
    sessions: Option<Arc<dyn SessionProvider>>,
    caches: Option<Arc<dyn CachePrimer>>,
}

impl HooksBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(mut self, runner: LocalRunner) -> Self {
        self.local = Some(runner);
        self
    }

    pub fn worker(mut self, pool: WorkerPool) -> Self {
        self.worker = Some(pool);
        self
    }

    pub fn sessions(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(provider);
        self
    }

    pub fn caches(mut self, caches: Arc<dyn CachePrimer>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Fill every unset slot and add the built-in commands.
    pub fn build(self, config: &AppConfig, signals: &Signals) -> Hooks {
        let (sessions, memory_sessions) = match self.sessions {
            Some(provider) => (provider, None),
            None => {
                let memory = Arc::new(MemorySessions::new(signals.clone()));
                let provider: Arc<dyn SessionProvider> = memory.clone();
                (provider, Some(memory))
            }
        };
        let (caches, memory_caches) = match self.caches {
            Some(caches) => (caches, None),
            None => {
                let memory = Arc::new(MemoryCaches::new());
                let primer: Arc<dyn CachePrimer> = memory.clone();
                (primer, Some(memory))
            }
        };

        let mut local = self.local.unwrap_or_default();
        builtins::register_local(&mut local, memory_sessions, memory_caches);

        let mut worker = self
            .worker
            .unwrap_or_else(|| WorkerPool::new(config.worker_concurrency, config.worker_queue));
        builtins::register_worker(&mut worker);

        Hooks {
            local: Arc::new(local),
            worker: Arc::new(worker),
            sessions,
            caches,
        }
    }
}

/// State shared by everything the application starts.
pub struct AppContext {
    pub config: AppConfig,
    pub hooks: Hooks,
    pub signals: Signals,
    pub supervisor: TaskSupervisor,
}

pub struct Application {
    context: Arc<AppContext>,
    serving: AtomicBool,
}

impl Application {
    pub fn new(config: AppConfig, hooks: HooksBuilder) -> Self {
        let signals = Signals::default();
        let hooks = hooks.build(&config, &signals);
        Self {
            context: Arc::new(AppContext {
                config,
                hooks,
                signals,
                supervisor: TaskSupervisor::new(),
            }),
            serving: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Prime caches, resolve both command tables, then serve.
    pub async fn on_start(&self) -> Result<ServerHandle, AppError> {
        let ctx = &self.context;
        ctx.hooks
            .caches
            .gather(&ctx.config.caches)
            .await
            .map_err(AppError::Cache)?;

        let local = ctx.hooks.local.commands();
        info!(count = local.len(), commands = ?local, "local commands gathered");

        for (name, descriptor) in ctx.hooks.worker.gather() {
            debug!(task = %name, descriptor = %descriptor, "worker task");
        }
        let enabled = ctx
            .hooks
            .worker
            .resolve(&ctx.config.worker_tasks)
            .map_err(AppError::UnknownWorkerTask)?;
        info!(count = enabled.len(), tasks = ?enabled, "worker tasks resolved");

        self.check_tables()?;
        self.serve().await
    }

    /// A command name may live in only one of the two tables.
    pub fn check_tables(&self) -> Result<(), AppError> {
        let hooks = &self.context.hooks;
        match hooks.worker.tasks().into_iter().find(|name| hooks.local.contains(name)) {
            Some(name) => Err(AppError::AmbiguousCommand(name)),
            None => Ok(()),
        }
    }

    /// Build the router and socket wrapper, start listening, then start the
    /// worker pool with the wrapper as its result sink.
    pub async fn serve(&self) -> Result<ServerHandle, AppError> {
        if self.serving.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyServing);
        }
        // Bind first so a failed bind leaves no socket tasks behind.
        let listener = match crate::socket::bind(&self.context.config).await {
            Ok(listener) => listener,
            Err(e) => {
                self.serving.store(false, Ordering::SeqCst);
                return Err(AppError::Bind(e));
            }
        };
        let hooks = &self.context.hooks;
        let router = Arc::new(CommandRouter::new(
            Arc::clone(&hooks.local),
            Arc::clone(&hooks.worker),
        ));
        let socket = SocketWrapper::new(Arc::clone(&self.context), router);

        let handle = match self.connect(&socket, listener) {
            Ok(handle) => handle,
            Err(e) => {
                self.serving.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let sink: Arc<dyn ResultSink> = socket;
        let _ = hooks.worker.start(sink, &self.context.supervisor);
        Ok(handle)
    }

    /// Start the accept loop on `listener` in the background.
    pub fn connect(&self, socket: &Arc<SocketWrapper>, listener: TcpListener) -> Result<ServerHandle, AppError> {
        Ok(socket.serve_on(listener)?)
    }

    /// Stop accepting, end every connection loop, and wait for tracked tasks.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        info!("shutting down");
        self.context.supervisor.shutdown(timeout).await
    }
}
