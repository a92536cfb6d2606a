use std::sync::Arc;

use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use sfnpool_common::config::LogLevel;
use sfnpool_common::types::{TaskRequest, TaskResponse};
use sfnpool_common::{Result, SfnPoolError};

use crate::handlers;
use crate::sfn::{ActivityService, SfnClient};

use super::heartbeat::run_heartbeat_loop;
use super::{TokenSlot, WorkerRuntime};

/// Arguments of the hidden `worker-child` subcommand the pool spawns.
#[derive(Args, Debug)]
pub struct WorkerChildArgs {
    /// Registry name of the task handler to instantiate.
    #[arg(long)]
    pub worker: String,

    /// Service region, taken from the activity ARN by the controller.
    #[arg(long)]
    pub region: Option<String>,

    /// Seconds between heartbeats; 0 disables the heartbeat loop.
    #[arg(long, default_value_t = 0)]
    pub heartbeat: u64,

    /// JSON document handed to the handler constructor.
    #[arg(long)]
    pub worker_config: Option<String>,

    #[arg(long, default_value = "info")]
    pub loglevel: String,
}

impl WorkerChildArgs {
    pub fn loglevel(&self) -> LogLevel {
        self.loglevel.parse().unwrap_or_default()
    }
}

/// Entry point of a worker process: build the runtime, then serve task
/// requests from the controller over stdin/stdout until stdin closes.
pub async fn run(args: WorkerChildArgs) -> Result<()> {
    install_signal_dispositions();

    tracing::info!(worker = %args.worker, "Initializing worker");

    let worker_config = match &args.worker_config {
        Some(raw) => Some(
            serde_json::from_str(raw)
                .map_err(|e| SfnPoolError::Config(format!("invalid worker_config: {}", e)))?,
        ),
        None => None,
    };

    let registry = handlers::builtin_registry();
    let handler = registry
        .build(&args.worker, worker_config)
        .map_err(|e| SfnPoolError::Handler(e.to_string()))?;

    let service: Arc<dyn ActivityService> = Arc::new(
        SfnClient::new(args.region.as_deref())
            .map_err(|e| SfnPoolError::Service(e.to_string()))?,
    );

    let slot = Arc::new(TokenSlot::default());

    if args.heartbeat > 0 {
        // Dedicated client so the heartbeat loop never shares a connection
        // with the executor's report calls.
        let heartbeat_service: Arc<dyn ActivityService> = Arc::new(
            SfnClient::new(args.region.as_deref())
                .map_err(|e| SfnPoolError::Service(e.to_string()))?,
        );
        tokio::spawn(run_heartbeat_loop(
            heartbeat_service,
            Arc::clone(&slot),
            args.heartbeat,
        ));
    }

    let runtime = WorkerRuntime::new(service, handler, slot);
    serve_stdio(&runtime).await
}

/// One JSON line in, one JSON line out, one task at a time. Stdout belongs
/// to the protocol; all logging goes to stderr.
async fn serve_stdio(runtime: &WorkerRuntime) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SfnPoolError::Internal(format!("stdin read failed: {}", e)))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: TaskRequest = serde_json::from_str(&line).map_err(|e| {
            // A malformed request line means the controller and worker
            // disagree on the protocol; exiting lets the pool respawn us.
            SfnPoolError::Internal(format!("malformed task request: {}", e))
        })?;

        let (token, status) = runtime.execute_task(&request.token, &request.input).await;

        let mut reply = serde_json::to_string(&TaskResponse { token, status })?;
        reply.push('\n');
        stdout
            .write_all(reply.as_bytes())
            .await
            .map_err(|e| SfnPoolError::Internal(format!("stdout write failed: {}", e)))?;
        stdout
            .flush()
            .await
            .map_err(|e| SfnPoolError::Internal(format!("stdout flush failed: {}", e)))?;
    }

    tracing::info!("Task channel closed, worker exiting");
    Ok(())
}

/// The controller owns SIGINT (it is delivered to the whole foreground
/// process group); workers must die promptly on the pool's SIGTERM.
#[cfg(unix)]
fn install_signal_dispositions() {
    use nix::sys::signal::{signal, SigHandler, Signal};

    unsafe {
        let _ = signal(Signal::SIGTERM, SigHandler::SigDfl);
        let _ = signal(Signal::SIGINT, SigHandler::SigIgn);
    }
}

#[cfg(not(unix))]
fn install_signal_dispositions() {}
