use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::worker::TaskReporter;

mod hello;

pub use hello::HelloWorker;

/// A user task handler. One instance lives in each worker process and
/// serves that process's tasks sequentially.
///
/// A handler may return its output, report success or failure itself
/// through the reporter (the runtime will not report twice), or fail with
/// an error. Output encoding: a raw string is passed verbatim, JSON null
/// becomes `{}`, anything else is JSON-encoded.
#[async_trait]
pub trait TaskHandler: Send + Sync + std::fmt::Debug {
    async fn run_task(
        &self,
        ctx: &TaskReporter,
        token: &str,
        input: Value,
    ) -> Result<TaskOutput, HandlerError>;
}

/// Result document of a task run.
#[derive(Clone, Debug)]
pub enum TaskOutput {
    /// Passed to the service verbatim; must already be a JSON document.
    Raw(String),
    Json(Value),
    Empty,
}

impl TaskOutput {
    /// Encode into the output document sent with the success report.
    pub fn into_document(self) -> String {
        match self {
            TaskOutput::Raw(raw) => raw,
            TaskOutput::Empty | TaskOutput::Json(Value::Null) => "{}".to_string(),
            TaskOutput::Json(value) => value.to_string(),
        }
    }
}

impl From<Value> for TaskOutput {
    fn from(value: Value) -> Self {
        TaskOutput::Json(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("unknown worker '{0}'")]
    UnknownWorker(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Constructor for a task handler, invoked once per worker process with the
/// configured `worker_config`.
pub type HandlerFactory = fn(Option<Value>) -> Result<Box<dyn TaskHandler>, HandlerError>;

/// Name-to-constructor table for task handlers.
///
/// The configured `worker` key selects which entry each worker process
/// instantiates at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: HandlerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(
        &self,
        name: &str,
        config: Option<Value>,
    ) -> Result<Box<dyn TaskHandler>, HandlerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| HandlerError::UnknownWorker(name.to_string()))?;
        factory(config)
    }
}

/// The handlers this binary ships with. User handlers register here.
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("hello", hello::factory);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_encoding() {
        assert_eq!(
            TaskOutput::Raw("{\"already\":\"json\"}".into()).into_document(),
            "{\"already\":\"json\"}"
        );
        assert_eq!(TaskOutput::Empty.into_document(), "{}");
        assert_eq!(TaskOutput::Json(Value::Null).into_document(), "{}");
        assert_eq!(
            TaskOutput::Json(json!({"ok": true})).into_document(),
            "{\"ok\":true}"
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = builtin_registry();
        assert!(registry.contains("hello"));
        assert!(!registry.contains("missing"));
        assert_eq!(registry.names(), vec!["hello"]);

        let err = registry.build("missing", None).unwrap_err();
        assert!(matches!(err, HandlerError::UnknownWorker(_)));
    }
}
