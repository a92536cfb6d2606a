use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;

use sfnpool_common::truncate::safe_cause;
use sfnpool_common::types::TaskStatus;

use crate::handlers::TaskHandler;
use crate::sfn::{ActivityService, DEFAULT_ERROR_CODE};

pub mod entry;
pub mod heartbeat;

/// The token of the task currently running in this worker process, together
/// with its start time.
///
/// Written by the executor at task start/end and read by the heartbeat
/// loop, so access goes through a mutex. Token and start time are set and
/// cleared together.
#[derive(Default)]
pub struct TokenSlot {
    inner: Mutex<Option<RunningTask>>,
}

struct RunningTask {
    token: String,
    started_at: Instant,
}

impl TokenSlot {
    pub fn set(&self, token: &str) {
        *self.inner.lock().unwrap() = Some(RunningTask {
            token: token.to_string(),
            started_at: Instant::now(),
        });
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap() = None;
    }

    pub fn snapshot(&self) -> Option<(String, Instant)> {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|task| (task.token.clone(), task.started_at))
    }
}

/// Terminal-report state of one task. Transitions only move forward: once
/// any terminal status is recorded, further reports are skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportState {
    Unset,
    SuccessReported,
    FailureReported,
}

/// Per-task reporting handle given to the handler.
///
/// Guarantees at most one terminal report reaches the wire for the task:
/// whichever transition happens first wins, including a handler reporting
/// directly before returning.
pub struct TaskReporter {
    service: Arc<dyn ActivityService>,
    token: String,
    state: Mutex<ReportState>,
}

impl TaskReporter {
    fn new(service: Arc<dyn ActivityService>, token: &str) -> Self {
        Self {
            service,
            token: token.to_string(),
            state: Mutex::new(ReportState::Unset),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self) -> ReportState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ReportState) {
        *self.state.lock().unwrap() = state;
    }

    /// Report the task's output document. No-op if a terminal status was
    /// already recorded.
    pub async fn report_success(&self, output: &str) {
        if self.state() != ReportState::Unset {
            tracing::debug!(token = %self.token, "Terminal status already recorded, skipping success report");
            return;
        }

        match self.service.send_task_success(&self.token, output).await {
            Ok(()) => self.set_state(ReportState::SuccessReported),
            Err(e) => {
                // The report is not retried; the service-side task timeout
                // fails the task. Locking the state prevents a second
                // terminal report on this token.
                tracing::error!(token = %self.token, error = %e, "Error sending task success");
                self.set_state(ReportState::FailureReported);
            }
        }
    }

    /// Report a failure with an error code and cause. The cause is bounded
    /// to the service limit. No-op if a terminal status was already
    /// recorded.
    pub async fn report_failure(&self, error: &str, cause: &str) {
        if self.state() != ReportState::Unset {
            tracing::debug!(token = %self.token, "Terminal status already recorded, skipping failure report");
            return;
        }

        let cause = safe_cause(cause);
        if let Err(e) = self
            .service
            .send_task_failure(&self.token, error, &cause)
            .await
        {
            tracing::error!(token = %self.token, error = %e, "Error sending task failure");
        }
        self.set_state(ReportState::FailureReported);
    }
}

/// The per-process task execution engine: one handler instance, one token
/// slot, one task at a time.
pub struct WorkerRuntime {
    service: Arc<dyn ActivityService>,
    handler: Box<dyn TaskHandler>,
    slot: Arc<TokenSlot>,
}

impl WorkerRuntime {
    pub fn new(
        service: Arc<dyn ActivityService>,
        handler: Box<dyn TaskHandler>,
        slot: Arc<TokenSlot>,
    ) -> Self {
        Self {
            service,
            handler,
            slot,
        }
    }

    /// Run one task to its terminal report.
    ///
    /// Nothing the handler does escapes this call: parse failures, handler
    /// errors and panics all end in a single failure report, and the token
    /// slot is cleared on every path.
    pub async fn execute_task(&self, token: &str, input_text: &str) -> (String, TaskStatus) {
        self.slot.set(token);
        let reporter = TaskReporter::new(Arc::clone(&self.service), token);

        tracing::debug!(token, "Running task");

        match serde_json::from_str::<Value>(input_text) {
            Err(e) => {
                reporter
                    .report_failure(
                        DEFAULT_ERROR_CODE,
                        &format!("Error parsing task input json: {}", e),
                    )
                    .await;
            }
            Ok(input) => {
                let handler_run =
                    std::panic::AssertUnwindSafe(self.handler.run_task(&reporter, token, input))
                        .catch_unwind()
                        .await;

                match handler_run {
                    Ok(Ok(output)) => {
                        reporter.report_success(&output.into_document()).await;
                    }
                    Ok(Err(e)) => {
                        tracing::error!(token, error = %e, "Exception running task");
                        reporter
                            .report_failure(
                                DEFAULT_ERROR_CODE,
                                &format!("Exception raised during task run: {}", e),
                            )
                            .await;
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(token, panic = %message, "Task handler panicked");
                        reporter
                            .report_failure(
                                DEFAULT_ERROR_CODE,
                                &format!("Exception raised during task run: {}", message),
                            )
                            .await;
                    }
                }
            }
        }

        let status = match reporter.state() {
            ReportState::SuccessReported => TaskStatus::Success,
            _ => TaskStatus::Failure,
        };

        self.slot.clear();
        tracing::debug!(token, status = %status, "Task complete");

        (token.to_string(), status)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic in task handler".to_string()
    }
}
