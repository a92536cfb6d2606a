use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use sfnpool_common::types::{ActivityTask, TaskRequest, TaskResponse, TaskStatus};

mod process;

pub use process::ProcessLauncher;

const LAUNCH_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Failed to spawn worker process: {0}")]
    Spawn(String),

    #[error("Worker I/O error: {0}")]
    Io(String),

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Worker process exited unexpectedly")]
    WorkerExited,
}

/// Creates worker processes for the pool. Split out so pool behavior is
/// testable with in-process fakes.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    type Worker: WorkerHandle;

    async fn launch(&self) -> Result<Self::Worker, PoolError>;
}

/// One live worker process, serving tasks one at a time.
#[async_trait]
pub trait WorkerHandle: Send + 'static {
    async fn run_task(&mut self, request: &TaskRequest) -> Result<TaskResponse, PoolError>;

    /// Let the worker finish up and exit.
    async fn shutdown(self);
}

/// Callback invoked on the controller side when a dispatched task
/// completes.
pub type CompletionFn = Box<dyn FnOnce(TaskResponse) + Send + 'static>;

struct Submission {
    request: TaskRequest,
    done: CompletionFn,
}

/// Pool sizing and recycling parameters.
#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub processes: u32,
    /// Tasks a worker process serves before it is replaced; None disables
    /// recycling.
    pub max_tasks_per_child: Option<u32>,
}

/// Fixed-size pool of worker processes.
///
/// One lane task per process pulls submissions off a shared queue, relays
/// them to its worker and fires the completion callback. Worker processes
/// that exceed their task quota or fail mid-task are replaced.
pub struct WorkerPool {
    submit_tx: mpsc::Sender<Submission>,
    lanes: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start<L: WorkerLauncher>(settings: PoolSettings, launcher: Arc<L>) -> Self {
        let processes = settings.processes.max(1) as usize;
        let (submit_tx, submit_rx) = mpsc::channel(processes);
        let submit_rx = Arc::new(Mutex::new(submit_rx));

        let mut lanes = Vec::with_capacity(processes);
        for lane in 0..processes as u32 {
            lanes.push(tokio::spawn(lane_loop(
                lane,
                Arc::clone(&launcher),
                Arc::clone(&submit_rx),
                settings.max_tasks_per_child,
            )));
        }

        tracing::info!(processes, "Worker pool started");

        Self { submit_tx, lanes }
    }

    /// Hand a task to the next idle worker process. Submissions are gated
    /// by the capacity permits, so an idle lane is always there to take it.
    pub async fn submit(&self, task: ActivityTask, done: CompletionFn) {
        let submission = Submission {
            request: TaskRequest {
                token: task.token,
                input: task.input,
            },
            done,
        };

        if self.submit_tx.send(submission).await.is_err() {
            tracing::error!("Worker pool is shut down; dropping task");
        }
    }

    /// Refuse new submissions, wait for in-flight tasks to finish and for
    /// every worker process to exit.
    pub async fn shutdown(self) {
        drop(self.submit_tx);
        for lane in self.lanes {
            let _ = lane.await;
        }
        tracing::info!("Worker pool drained");
    }
}

async fn lane_loop<L: WorkerLauncher>(
    lane: u32,
    launcher: Arc<L>,
    submissions: Arc<Mutex<mpsc::Receiver<Submission>>>,
    max_tasks: Option<u32>,
) {
    let mut worker = launch_with_retry(lane, launcher.as_ref()).await;
    let mut served: u32 = 0;

    loop {
        let submission = { submissions.lock().await.recv().await };
        let Some(Submission { request, done }) = submission else {
            break;
        };

        metrics::gauge!("pool.tasks.active").increment(1.0);

        let response = match worker.run_task(&request).await {
            Ok(response) => {
                served += 1;
                response
            }
            Err(e) => {
                // No terminal report is confirmed for this task; the
                // service-side timeout governs. Replace the broken worker.
                tracing::error!(
                    lane,
                    token = %request.token,
                    error = %e,
                    "Worker process failed mid-task; replacing it"
                );
                worker.shutdown().await;
                worker = launch_with_retry(lane, launcher.as_ref()).await;
                served = 0;
                TaskResponse {
                    token: request.token.clone(),
                    status: TaskStatus::Failure,
                }
            }
        };

        metrics::gauge!("pool.tasks.active").decrement(1.0);
        metrics::counter!("pool.tasks.completed", "status" => response.status.as_str())
            .increment(1);

        done(response);

        if let Some(max) = max_tasks {
            if served >= max {
                tracing::debug!(lane, served, "Worker reached its task quota; recycling");
                worker.shutdown().await;
                worker = launch_with_retry(lane, launcher.as_ref()).await;
                served = 0;
            }
        }
    }

    worker.shutdown().await;
    tracing::debug!(lane, "Pool lane exited");
}

async fn launch_with_retry<L: WorkerLauncher>(lane: u32, launcher: &L) -> L::Worker {
    loop {
        match launcher.launch().await {
            Ok(worker) => return worker,
            Err(e) => {
                tracing::error!(lane, error = %e, "Failed to launch worker process; retrying");
                tokio::time::sleep(LAUNCH_RETRY_BACKOFF).await;
            }
        }
    }
}
