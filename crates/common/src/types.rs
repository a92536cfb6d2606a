use serde::{Deserialize, Serialize};

/// One unit of work pulled off the activity queue.
///
/// The token is an opaque non-empty string the service requires on every
/// report and heartbeat; the input is the raw JSON text of the task payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityTask {
    pub token: String,
    pub input: String,
}

/// Terminal status of one task execution, as returned by a worker process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "task_success")]
    Success,
    #[serde(rename = "task_failure")]
    Failure,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "task_success",
            TaskStatus::Failure => "task_failure",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task invocation sent to a worker process, one JSON line per request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRequest {
    pub token: String,
    pub input: String,
}

/// Completion reply from a worker process, one JSON line per response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub token: String,
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let line = serde_json::to_string(&TaskResponse {
            token: "AT-0".into(),
            status: TaskStatus::Success,
        })
        .unwrap();
        assert!(line.contains("task_success"));

        let parsed: TaskResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.status, TaskStatus::Success);
        assert_eq!(parsed.status.as_str(), "task_success");
    }

    #[test]
    fn test_request_round_trip() {
        let req = TaskRequest {
            token: "token123".into(),
            input: "{\"name\":\"foo\"}".into(),
        };
        let line = serde_json::to_string(&req).unwrap();
        let parsed: TaskRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.token, req.token);
        assert_eq!(parsed.input, req.input);
    }
}
