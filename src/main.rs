//! Command-line entry point for the switchboard server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Map, Value};
use switchboard_server::{Application, HooksBuilder};
use switchboard_telemetry::{init_telemetry, TelemetryConfig};

/// Realtime WebSocket command-dispatch server.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version)]
struct Args {
    /// JSON settings file layered over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to bind.
    #[arg(long)]
    ip: Option<String>,
    /// Port to bind.
    #[arg(long)]
    port: Option<u16>,
    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn overrides(&self) -> Value {
        let mut overrides = Map::new();
        if let Some(ip) = &self.ip {
            let _ = overrides.insert("ip".into(), json!(ip));
        }
        if let Some(port) = self.port {
            let _ = overrides.insert("port".into(), json!(port));
        }
        if self.json_logs {
            let _ = overrides.insert("log_json".into(), json!(true));
        }
        Value::Object(overrides)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = switchboard_settings::load_config(args.config.as_deref(), args.overrides())
        .context("failed to load settings")?;

    let _telemetry = init_telemetry(&TelemetryConfig::from_level_name(
        &config.log_level,
        config.log_json,
    ));
    tracing::info!(addr = %config.listen_addr(), "starting switchboard");

    let app = Application::new(config, HooksBuilder::new());
    let server = app.on_start().await.context("failed to start server")?;
    tracing::info!(port = server.port(), "switchboard ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    if !app.shutdown(Some(Duration::from_secs(10))).await {
        tracing::warn!("shutdown timed out with tasks still running");
    }
    server.join().await.context("accept loop failed")?;
    Ok(())
}
