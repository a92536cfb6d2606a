use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use sfnpool_common::config::ServerConfig;
use sfnpool_common::types::{TaskRequest, TaskResponse};

use super::{PoolError, WorkerHandle, WorkerLauncher};

const EXIT_GRACE: Duration = Duration::from_secs(30);

/// Spawns worker processes by re-invoking this executable with the hidden
/// `worker-child` subcommand. Task requests and responses travel as JSON
/// lines over the child's stdin/stdout; stderr is inherited so worker logs
/// land with the controller's.
pub struct ProcessLauncher {
    program: PathBuf,
    worker: String,
    region: Option<String>,
    heartbeat: u64,
    worker_config: Option<String>,
    loglevel: String,
}

impl ProcessLauncher {
    pub fn from_config(config: &ServerConfig, region: Option<&str>) -> Result<Self, PoolError> {
        let program = std::env::current_exe()
            .map_err(|e| PoolError::Spawn(format!("cannot locate own executable: {}", e)))?;

        let worker = config
            .worker
            .clone()
            .ok_or_else(|| PoolError::Spawn("no worker configured".into()))?;

        let worker_config = match &config.worker_config {
            Some(value) => Some(
                serde_json::to_string(value)
                    .map_err(|e| PoolError::Spawn(format!("unserializable worker_config: {}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            program,
            worker,
            region: region.map(str::to_string),
            heartbeat: config.heartbeat,
            worker_config,
            loglevel: config.loglevel.as_str().to_string(),
        })
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    type Worker = ChildWorker;

    async fn launch(&self) -> Result<ChildWorker, PoolError> {
        let mut command = Command::new(&self.program);
        command
            .arg("worker-child")
            .arg("--worker")
            .arg(&self.worker)
            .arg("--heartbeat")
            .arg(self.heartbeat.to_string())
            .arg("--loglevel")
            .arg(&self.loglevel)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(region) = &self.region {
            command.arg("--region").arg(region);
        }
        if let Some(config) = &self.worker_config {
            command.arg("--worker-config").arg(config);
        }

        let mut child = command.spawn().map_err(|e| PoolError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("worker stdout not piped".into()))?;

        tracing::debug!(pid = child.id(), "Worker process spawned");

        Ok(ChildWorker {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
        })
    }
}

/// Handle on one spawned worker process.
pub struct ChildWorker {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl WorkerHandle for ChildWorker {
    async fn run_task(&mut self, request: &TaskRequest) -> Result<TaskResponse, PoolError> {
        let mut line =
            serde_json::to_string(request).map_err(|e| PoolError::Protocol(e.to_string()))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PoolError::Io(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| PoolError::Io(e.to_string()))?;

        let reply = self
            .replies
            .next_line()
            .await
            .map_err(|e| PoolError::Io(e.to_string()))?
            .ok_or(PoolError::WorkerExited)?;

        serde_json::from_str(&reply).map_err(|e| PoolError::Protocol(e.to_string()))
    }

    async fn shutdown(mut self) {
        // Closing stdin tells the child its task channel is done.
        drop(self.stdin);

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(status = %status, "Worker process exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Error waiting for worker process"),
            Err(_) => {
                tracing::warn!("Worker process did not exit in time; killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}
