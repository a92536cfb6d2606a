use std::sync::Arc;
use std::time::Duration;

use crate::sfn::ActivityService;

use super::TokenSlot;

/// Periodic heartbeat loop for the task running in this worker process.
///
/// Runs for the life of the process on its own client, so beats never
/// contend with the executor's report calls. The first beat for a task is
/// anchored to the task's start time: wake-ups landing early in a task's
/// life sleep out the remainder of the interval first, so a task running
/// shorter than the interval produces no beats at all, and the first beat
/// lands no earlier than half a second before one full interval.
pub async fn run_heartbeat_loop(
    service: Arc<dyn ActivityService>,
    slot: Arc<TokenSlot>,
    interval_secs: u64,
) {
    tracing::info!(interval = interval_secs, "Started heartbeat loop");

    let interval = Duration::from_secs(interval_secs);
    let mut failed_token: Option<String> = None;

    loop {
        let Some((token, started_at)) = slot.snapshot() else {
            tokio::time::sleep(interval).await;
            continue;
        };

        let delta = started_at.elapsed();
        if delta.as_secs_f64() + 0.5 < interval_secs as f64 {
            tokio::time::sleep(interval - delta).await;
            continue;
        }

        if failed_token.as_deref() == Some(token.as_str()) {
            // The service already rejected this token; stay quiet until the
            // task finishes locally.
            tokio::time::sleep(interval).await;
            continue;
        }

        tracing::debug!(token = %token, "Sending heartbeat for task");
        match service.send_task_heartbeat(&token).await {
            Ok(()) => {
                metrics::counter!("worker.heartbeats.sent").increment(1);
                failed_token = None;
            }
            Err(e) if e.is_terminal_heartbeat() => {
                tracing::debug!(
                    token = %token,
                    error = %e,
                    "Task gone on service side; suppressing heartbeats for this token"
                );
                failed_token = Some(token);
            }
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "Error sending heartbeat for task");
            }
        }

        tokio::time::sleep(interval).await;
    }
}
