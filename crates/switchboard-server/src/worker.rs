//! Worker pool: commands offloaded from the connection task onto a bounded
//! job queue drained by a fixed set of workers.
//!
//! Submission answers immediately; the task's outcome is delivered later to
//! the originating connection through a [`ResultSink`], keyed by the
//! connection identity carried on the [`Job`].

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::{CommandError, ConnectionId, JobId, Request};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::reply::Reply;
use crate::shutdown::TaskSupervisor;

/// A unit of work that can run on the pool.
#[async_trait]
pub trait WorkerTask: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Value, CommandError>;
}

/// Where finished jobs are delivered.
pub trait ResultSink: Send + Sync {
    /// Deliver `payload` to `connection`. Returns `false` if it is gone.
    fn deliver(&self, connection: &ConnectionId, payload: &Value) -> bool;
}

/// One queued invocation of a worker task.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub connection: ConnectionId,
    pub uuid: Option<Value>,
    pub command: String,
    pub request: Request,
}

struct TaskEntry {
    descriptor: &'static str,
    task: Arc<dyn WorkerTask>,
}

pub struct WorkerPool {
    tasks: HashMap<String, TaskEntry>,
    concurrency: usize,
    queue: usize,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
}

impl WorkerPool {
    pub fn new(concurrency: usize, queue: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            concurrency: concurrency.max(1),
            queue: queue.max(1),
            tx: Mutex::new(None),
        }
    }

    /// Register a task under `name`. Its descriptor is the task's type path.
    pub fn register<T: WorkerTask + 'static>(&mut self, name: &str, task: T) {
        let entry = TaskEntry {
            descriptor: std::any::type_name::<T>(),
            task: Arc::new(task),
        };
        let _ = self.tasks.insert(name.to_owned(), entry);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names (sorted).
    pub fn tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Task name to descriptor.
    pub fn gather(&self) -> BTreeMap<String, String> {
        self.tasks
            .iter()
            .map(|(name, entry)| (name.clone(), entry.descriptor.to_owned()))
            .collect()
    }

    /// Check that every name in `required` is registered. An empty list
    /// resolves to the full table.
    pub fn resolve(&self, required: &[String]) -> Result<Vec<String>, String> {
        if required.is_empty() {
            return Ok(self.tasks());
        }
        for name in required {
            if !self.contains(name) {
                return Err(name.clone());
            }
        }
        Ok(required.to_vec())
    }

    pub fn is_started(&self) -> bool {
        self.tx.lock().is_some()
    }

    /// Open the job queue and spawn the workers. Returns `false` if the pool
    /// was already started.
    pub fn start(self: &Arc<Self>, sink: Arc<dyn ResultSink>, supervisor: &TaskSupervisor) -> bool {
        let (tx, rx) = mpsc::channel(self.queue);
        {
            let mut slot = self.tx.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(tx);
        }

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..self.concurrency {
            let pool = Arc::clone(self);
            let rx = Arc::clone(&rx);
            let sink = Arc::clone(&sink);
            let token = supervisor.token();
            let _ = supervisor.spawn("worker", async move {
                loop {
                    let job = tokio::select! {
                        () = token.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => job,
                    };
                    let Some(job) = job else { break };
                    pool.execute(job, sink.as_ref()).await;
                }
                debug!(worker, "worker stopped");
                Ok::<(), Infallible>(())
            });
        }
        info!(workers = self.concurrency, queue = self.queue, "worker pool started");
        true
    }

    /// Queue a job. Fails if the pool is not running.
    pub async fn submit(&self, job: Job) -> Result<(), CommandError> {
        let tx = self.tx.lock().clone().ok_or(CommandError::WorkerUnavailable)?;
        tx.send(job).await.map_err(|_| CommandError::WorkerUnavailable)
    }

    async fn execute(&self, job: Job, sink: &dyn ResultSink) {
        let outcome = match self.tasks.get(&job.command) {
            Some(entry) => entry.task.execute(job.request).await,
            None => Err(CommandError::UnrecognizedCommand(job.command.clone())),
        };
        if let Err(ref e) = outcome {
            warn!(job = %job.id, command = %job.command, error = %e, "worker task failed");
        }
        let reply = Reply::from_outcome(job.uuid, job.command, &outcome);
        if !sink.deliver(&job.connection, &reply.to_value()) {
            debug!(job = %job.id, connection = %job.connection, "result dropped, connection gone");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("tasks", &self.tasks())
            .field("concurrency", &self.concurrency)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
