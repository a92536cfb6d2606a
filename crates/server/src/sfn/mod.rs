use async_trait::async_trait;

use sfnpool_common::types::ActivityTask;

mod client;
mod sigv4;

pub use client::SfnClient;
pub use sigv4::Credentials;

/// Error code reported for uncaught handler failures.
pub const DEFAULT_ERROR_CODE: &str = "Task.Failure";

/// Heartbeat error codes after which the task is gone on the service side
/// and further beats for the same token are pointless.
const HEARTBEAT_TERMINAL_CODES: [&str; 3] = ["TaskDoesNotExist", "InvalidToken", "TaskTimedOut"];

/// The activity-queue RPC surface of the state-machine service.
///
/// All operations are fallible and transient failures are expected; callers
/// log and swallow them (the service-side task timeout is the backstop).
#[async_trait]
pub trait ActivityService: Send + Sync {
    /// Long-poll for the next task. The service holds the request for up to
    /// ~60 seconds and may return no work, which maps to `Ok(None)`.
    async fn poll_task(
        &self,
        activity_arn: &str,
        worker_name: &str,
    ) -> Result<Option<ActivityTask>, SfnError>;

    /// Report the task's output document and close it out successfully.
    async fn send_task_success(&self, token: &str, output: &str) -> Result<(), SfnError>;

    /// Close the task out as failed with an error code and cause text.
    async fn send_task_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), SfnError>;

    /// Prove the task is still being worked on.
    async fn send_task_heartbeat(&self, token: &str) -> Result<(), SfnError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SfnError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("Missing AWS credentials: {0}")]
    Credentials(String),

    #[error("Client configuration error: {0}")]
    Config(String),

    /// Typed error returned by the service, e.g. `TaskTimedOut`.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("Failed to parse service response: {0}")]
    Parse(String),
}

impl SfnError {
    /// The service error code, if this is a typed service error.
    pub fn code(&self) -> Option<&str> {
        match self {
            SfnError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether this is a heartbeat response that ends heartbeating for the
    /// current token.
    pub fn is_terminal_heartbeat(&self) -> bool {
        self.code()
            .is_some_and(|code| HEARTBEAT_TERMINAL_CODES.contains(&code))
    }
}
