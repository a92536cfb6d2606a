use async_trait::async_trait;
use serde_json::{json, Value};

use crate::worker::TaskReporter;

use super::{HandlerError, TaskHandler, TaskOutput};

/// Minimal example handler: greets the `name` field of the task input.
#[derive(Debug)]
pub struct HelloWorker {
    config: Option<Value>,
}

impl HelloWorker {
    pub fn new(config: Option<Value>) -> Self {
        Self { config }
    }
}

pub(super) fn factory(config: Option<Value>) -> Result<Box<dyn TaskHandler>, HandlerError> {
    Ok(Box::new(HelloWorker::new(config)))
}

#[async_trait]
impl TaskHandler for HelloWorker {
    async fn run_task(
        &self,
        _ctx: &TaskReporter,
        token: &str,
        input: Value,
    ) -> Result<TaskOutput, HandlerError> {
        tracing::debug!(token, "Worker in run_task");

        let name = input
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("World")
            .to_string();

        let greeting = self
            .config
            .as_ref()
            .and_then(|c| c.get("greeting"))
            .and_then(Value::as_str)
            .unwrap_or("Hello");

        Ok(TaskOutput::Json(json!({
            "message": format!("{}, {}", greeting, name)
        })))
    }
}
