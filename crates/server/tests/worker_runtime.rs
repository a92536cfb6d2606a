//! Task execution scenarios against a recording fake of the activity
//! service: terminal-report discipline, error containment and heartbeat
//! behavior.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use sfnpool_common::types::{ActivityTask, TaskStatus};
use sfnpool_server::handlers::{HandlerError, TaskHandler, TaskOutput};
use sfnpool_server::sfn::{ActivityService, SfnError};
use sfnpool_server::worker::heartbeat::run_heartbeat_loop;
use sfnpool_server::worker::{TaskReporter, TokenSlot, WorkerRuntime};

#[derive(Default)]
struct RecordingService {
    successes: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<(String, String, String)>>,
    heartbeats: Mutex<Vec<(String, Instant)>>,
    fail_success_rpc: bool,
    heartbeat_error_code: Option<String>,
}

impl RecordingService {
    fn successes(&self) -> Vec<(String, String)> {
        self.successes.lock().unwrap().clone()
    }

    fn failures(&self) -> Vec<(String, String, String)> {
        self.failures.lock().unwrap().clone()
    }

    fn heartbeats(&self) -> Vec<(String, Instant)> {
        self.heartbeats.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityService for RecordingService {
    async fn poll_task(
        &self,
        _activity_arn: &str,
        _worker_name: &str,
    ) -> Result<Option<ActivityTask>, SfnError> {
        Ok(None)
    }

    async fn send_task_success(&self, token: &str, output: &str) -> Result<(), SfnError> {
        if self.fail_success_rpc {
            return Err(SfnError::Http("connection reset".into()));
        }
        self.successes
            .lock()
            .unwrap()
            .push((token.to_string(), output.to_string()));
        Ok(())
    }

    async fn send_task_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), SfnError> {
        self.failures
            .lock()
            .unwrap()
            .push((token.to_string(), error.to_string(), cause.to_string()));
        Ok(())
    }

    async fn send_task_heartbeat(&self, token: &str) -> Result<(), SfnError> {
        self.heartbeats
            .lock()
            .unwrap()
            .push((token.to_string(), Instant::now()));
        if let Some(code) = &self.heartbeat_error_code {
            return Err(SfnError::Service {
                code: code.clone(),
                message: "task is gone".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct GoodWorker;

#[async_trait]
impl TaskHandler for GoodWorker {
    async fn run_task(
        &self,
        _ctx: &TaskReporter,
        _token: &str,
        _input: Value,
    ) -> Result<TaskOutput, HandlerError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(TaskOutput::Json(json!({"test": "success"})))
    }
}

#[derive(Debug)]
struct SlowWorker {
    delay: Duration,
}

#[async_trait]
impl TaskHandler for SlowWorker {
    async fn run_task(
        &self,
        _ctx: &TaskReporter,
        _token: &str,
        _input: Value,
    ) -> Result<TaskOutput, HandlerError> {
        tokio::time::sleep(self.delay).await;
        Ok(TaskOutput::Json(json!({"test": "success"})))
    }
}

#[derive(Debug)]
struct BadWorker {
    message: String,
}

#[async_trait]
impl TaskHandler for BadWorker {
    async fn run_task(
        &self,
        _ctx: &TaskReporter,
        _token: &str,
        _input: Value,
    ) -> Result<TaskOutput, HandlerError> {
        Err(HandlerError::msg(self.message.clone()))
    }
}

#[derive(Debug)]
struct PanicWorker;

#[async_trait]
impl TaskHandler for PanicWorker {
    async fn run_task(
        &self,
        _ctx: &TaskReporter,
        _token: &str,
        _input: Value,
    ) -> Result<TaskOutput, HandlerError> {
        panic!("boom");
    }
}

/// Reports failure itself, then returns a value anyway.
#[derive(Debug)]
struct SelfReportingWorker;

#[async_trait]
impl TaskHandler for SelfReportingWorker {
    async fn run_task(
        &self,
        ctx: &TaskReporter,
        _token: &str,
        _input: Value,
    ) -> Result<TaskOutput, HandlerError> {
        ctx.report_failure("Custom.Error", "reported directly by the handler")
            .await;
        Ok(TaskOutput::Json(json!({"ignored": true})))
    }
}

fn runtime_with(
    service: Arc<RecordingService>,
    handler: Box<dyn TaskHandler>,
) -> (WorkerRuntime, Arc<TokenSlot>) {
    let slot = Arc::new(TokenSlot::default());
    let runtime = WorkerRuntime::new(service, handler, Arc::clone(&slot));
    (runtime, slot)
}

#[tokio::test]
async fn test_worker_success() {
    let service = Arc::new(RecordingService::default());
    let (runtime, slot) = runtime_with(Arc::clone(&service), Box::new(GoodWorker));

    let (token, status) = runtime.execute_task("AT-0", "{\"foo\":\"bar\"}").await;

    assert_eq!(token, "AT-0");
    assert_eq!(status, TaskStatus::Success);
    assert_eq!(
        service.successes(),
        vec![("AT-0".to_string(), "{\"test\":\"success\"}".to_string())]
    );
    assert!(service.failures().is_empty());
    assert!(service.heartbeats().is_empty());
    assert!(slot.snapshot().is_none());
}

#[tokio::test]
async fn test_worker_failure_bad_input() {
    let service = Arc::new(RecordingService::default());
    let (runtime, _slot) = runtime_with(Arc::clone(&service), Box::new(GoodWorker));

    let (token, status) = runtime.execute_task("AT-0", "{\"bad json\"}").await;

    assert_eq!(token, "AT-0");
    assert_eq!(status, TaskStatus::Failure);
    // The handler never ran.
    assert!(service.successes().is_empty());

    let failures = service.failures();
    assert_eq!(failures.len(), 1);
    let (failed_token, error, cause) = &failures[0];
    assert_eq!(failed_token, "AT-0");
    assert_eq!(error, "Task.Failure");
    assert!(cause.starts_with("Error parsing task input json:"));
}

#[tokio::test]
async fn test_worker_failure_bad_worker() {
    let service = Arc::new(RecordingService::default());
    let (runtime, _slot) = runtime_with(
        Arc::clone(&service),
        Box::new(BadWorker {
            message: "Intentional bad worker error".into(),
        }),
    );

    let (token, status) = runtime.execute_task("AT-0", "{\"name\":\"foo\"}").await;

    assert_eq!(token, "AT-0");
    assert_eq!(status, TaskStatus::Failure);
    assert!(service.successes().is_empty());

    let failures = service.failures();
    assert_eq!(failures.len(), 1);
    let (_, error, cause) = &failures[0];
    assert_eq!(error, "Task.Failure");
    assert!(cause.starts_with("Exception raised during task run:"));
    assert!(cause.contains("Intentional bad worker error"));
}

#[tokio::test]
async fn test_worker_panic_contained() {
    let service = Arc::new(RecordingService::default());
    let (runtime, slot) = runtime_with(Arc::clone(&service), Box::new(PanicWorker));

    let (token, status) = runtime.execute_task("AT-0", "{}").await;

    assert_eq!(token, "AT-0");
    assert_eq!(status, TaskStatus::Failure);

    let failures = service.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].2.contains("boom"));
    assert!(slot.snapshot().is_none());
}

#[tokio::test]
async fn test_direct_report_is_the_single_terminal_report() {
    let service = Arc::new(RecordingService::default());
    let (runtime, _slot) = runtime_with(Arc::clone(&service), Box::new(SelfReportingWorker));

    let (_, status) = runtime.execute_task("AT-0", "{}").await;

    // The handler's own report won; the returned value was not reported.
    assert_eq!(status, TaskStatus::Failure);
    assert!(service.successes().is_empty());

    let failures = service.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1, "Custom.Error");
}

#[tokio::test]
async fn test_success_rpc_failure_locks_terminal_state() {
    let service = Arc::new(RecordingService {
        fail_success_rpc: true,
        ..RecordingService::default()
    });
    let (runtime, _slot) = runtime_with(Arc::clone(&service), Box::new(GoodWorker));

    let (_, status) = runtime.execute_task("AT-0", "{}").await;

    // The failed report is not retried and no failure report follows; the
    // service-side timeout owns this task now.
    assert_eq!(status, TaskStatus::Failure);
    assert!(service.successes().is_empty());
    assert!(service.failures().is_empty());
}

#[tokio::test]
async fn test_long_cause_is_truncated() {
    let service = Arc::new(RecordingService::default());
    let (runtime, _slot) = runtime_with(
        Arc::clone(&service),
        Box::new(BadWorker {
            message: "x".repeat(40000),
        }),
    );

    runtime.execute_task("AT-0", "{}").await;

    let failures = service.failures();
    assert_eq!(failures.len(), 1);
    let cause = &failures[0].2;
    assert_eq!(cause.len(), 32768);
    assert!(cause.ends_with("..."));
}

#[tokio::test]
async fn test_heartbeat_sent_once_for_slow_task() {
    let service = Arc::new(RecordingService::default());
    let heartbeat_service = Arc::new(RecordingService::default());

    let (runtime, slot) = runtime_with(
        Arc::clone(&service),
        Box::new(SlowWorker {
            delay: Duration::from_secs(3),
        }),
    );

    let loop_task = tokio::spawn(run_heartbeat_loop(
        Arc::clone(&heartbeat_service) as Arc<dyn ActivityService>,
        Arc::clone(&slot),
        2,
    ));

    let started = Instant::now();
    let (_, status) = runtime.execute_task("token123", "{\"name\":\"foo\"}").await;
    assert_eq!(status, TaskStatus::Success);

    // Quiescence window: no further beats once the slot is cleared.
    tokio::time::sleep(Duration::from_secs(3)).await;
    loop_task.abort();

    let beats = heartbeat_service.heartbeats();
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].0, "token123");
    // Anchored to the task start, never earlier than H - 0.5.
    assert!(beats[0].1.duration_since(started) >= Duration::from_millis(1500));

    // The executor's own client saw no heartbeats.
    assert!(service.heartbeats().is_empty());
}

#[tokio::test]
async fn test_fast_task_produces_no_heartbeats() {
    let service = Arc::new(RecordingService::default());
    let heartbeat_service = Arc::new(RecordingService::default());

    let (runtime, slot) = runtime_with(
        Arc::clone(&service),
        Box::new(SlowWorker {
            delay: Duration::from_secs(1),
        }),
    );

    let loop_task = tokio::spawn(run_heartbeat_loop(
        Arc::clone(&heartbeat_service) as Arc<dyn ActivityService>,
        Arc::clone(&slot),
        2,
    ));

    runtime.execute_task("token123", "{}").await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    loop_task.abort();

    assert!(heartbeat_service.heartbeats().is_empty());
}

#[tokio::test]
async fn test_heartbeats_suppressed_after_terminal_error() {
    let service = Arc::new(RecordingService::default());
    let heartbeat_service = Arc::new(RecordingService {
        heartbeat_error_code: Some("TaskTimedOut".into()),
        ..RecordingService::default()
    });

    let (runtime, slot) = runtime_with(
        Arc::clone(&service),
        Box::new(SlowWorker {
            delay: Duration::from_millis(3200),
        }),
    );

    let loop_task = tokio::spawn(run_heartbeat_loop(
        Arc::clone(&heartbeat_service) as Arc<dyn ActivityService>,
        Arc::clone(&slot),
        1,
    ));

    runtime.execute_task("AT-0", "{}").await;

    // One attempt, then silence for the rest of the task.
    let beats = heartbeat_service.heartbeats();
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].0, "AT-0");

    // A different token starts beating again.
    runtime.execute_task("AT-1", "{}").await;
    let beats = heartbeat_service.heartbeats();
    assert!(beats.len() >= 2);
    assert_eq!(beats.last().unwrap().0, "AT-1");

    loop_task.abort();
}
