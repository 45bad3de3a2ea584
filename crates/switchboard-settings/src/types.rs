use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for the switchboard server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address to bind.
    pub ip: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Live connections accepted before new ones are rejected.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before sends are dropped.
    pub max_send_queue: usize,
    /// Ping period of each connection's writer.
    pub heartbeat_interval_secs: u64,
    /// Number of worker tasks draining the job queue.
    pub worker_concurrency: usize,
    /// Bound of the worker job queue.
    pub worker_queue: usize,
    /// Worker task names that must resolve at startup. Empty means every
    /// registered task is enabled.
    pub worker_tasks: Vec<String>,
    /// Named cache seeds primed at startup.
    pub caches: BTreeMap<String, Value>,
    /// Default log level (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Emit JSON log lines instead of compact text.
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".into(),
            port: 8765,
            max_connections: 1024,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            worker_concurrency: 4,
            worker_queue: 1024,
            worker_tasks: Vec::new(),
            caches: BTreeMap::new(),
            log_level: "info".into(),
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Host and port for `TcpListener::bind`.
    pub fn bind_addr(&self) -> (&str, u16) {
        (self.ip.as_str(), self.port)
    }

    /// Printable `host:port`, with IPv6 hosts bracketed.
    pub fn listen_addr(&self) -> String {
        if self.ip.contains(':') && !self.ip.starts_with('[') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}
