use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::lifecycle::ShutdownFlag;
use crate::pool::WorkerPool;
use crate::sfn::ActivityService;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The controller: polls the activity queue only while a worker process is
/// free and farms each task out to the pool.
///
/// Capacity is a counting semaphore sized to the pool. A permit is taken
/// (and forgotten) before each dispatch and returned by the pool's
/// completion callback, so `in_flight + permits == processes` holds at all
/// times and a poll never dequeues work it cannot immediately hand over.
pub struct Server {
    service: Arc<dyn ActivityService>,
    pool: WorkerPool,
    permits: Arc<Semaphore>,
    activity_arn: String,
    server_name: String,
    shutdown: ShutdownFlag,
    config: Option<Value>,
}

impl Server {
    pub fn new(
        service: Arc<dyn ActivityService>,
        pool: WorkerPool,
        processes: u32,
        activity_arn: String,
        base_name: &str,
        shutdown: ShutdownFlag,
        server_config: Option<Value>,
    ) -> Self {
        let server_name = format!("{}-{}", base_name, host_label());

        tracing::debug!(
            server_name = %server_name,
            processes,
            "Creating server"
        );

        Self {
            service,
            pool,
            permits: Arc::new(Semaphore::new(processes as usize)),
            activity_arn,
            server_name,
            shutdown,
            config: server_config,
        }
    }

    /// Name shown in the service's monitoring UI: the configured base name
    /// plus the host IP, or the pid when the host does not resolve.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Operator-supplied `server_config`, untouched.
    pub fn server_config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Capacity semaphore, exposed for observation.
    pub fn capacity_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    /// The dispatch loop. Returns after the shutdown flag is set and the
    /// pool has drained.
    pub async fn run(self) {
        tracing::debug!("Run server");

        // A poll can return without work; the acquired permit is then
        // reused for the next poll instead of released.
        let mut worker_ready = false;

        while !self.shutdown.is_set() {
            if !worker_ready {
                tracing::debug!("Acquiring worker");
                match self.permits.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => break,
                }
                worker_ready = true;
            }

            match self
                .service
                .poll_task(&self.activity_arn, &self.server_name)
                .await
            {
                Ok(Some(task)) => {
                    tracing::debug!(token = %task.token, "Sending task to acquired worker");

                    let permits = Arc::clone(&self.permits);
                    self.pool
                        .submit(
                            task,
                            Box::new(move |response| {
                                permits.add_permits(1);
                                tracing::debug!(
                                    token = %response.token,
                                    status = %response.status,
                                    "Released worker for task"
                                );
                            }),
                        )
                        .await;

                    worker_ready = false;
                }
                Ok(None) => {
                    // Long poll expired without work; keep the permit.
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error polling for activity task");
                    metrics::counter!("server.poll.errors").increment(1);
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }

        // A permit reserved for the next task but never used goes back, so
        // the count reads full capacity once the pool drains.
        if worker_ready {
            self.permits.add_permits(1);
        }

        tracing::debug!("Server run complete");
        self.pool.shutdown().await;
        tracing::debug!("Workers exited");
    }
}

fn host_label() -> String {
    host_ip().unwrap_or_else(|| std::process::id().to_string())
}

#[cfg(unix)]
fn host_ip() -> Option<String> {
    use std::net::ToSocketAddrs;

    let hostname = nix::unistd::gethostname().ok()?.into_string().ok()?;
    let mut addrs = (hostname.as_str(), 0u16).to_socket_addrs().ok()?;
    addrs.next().map(|addr| addr.ip().to_string())
}

#[cfg(not(unix))]
fn host_ip() -> Option<String> {
    None
}
