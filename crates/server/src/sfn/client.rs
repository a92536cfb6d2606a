use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sfnpool_common::types::ActivityTask;

use super::sigv4::{self, Credentials};
use super::{ActivityService, SfnError};

// ---------------------------------------------------------------------------
// Wire types (JSON 1.0 protocol)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PollRequest<'a> {
    activity_arn: &'a str,
    worker_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollResponse {
    #[serde(default)]
    task_token: Option<String>,
    #[serde(default)]
    input: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessRequest<'a> {
    task_token: &'a str,
    output: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureRequest<'a> {
    task_token: &'a str,
    error: &'a str,
    cause: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest<'a> {
    task_token: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// Strip the namespace prefix a typed service error may carry, e.g.
/// `com.amazonaws.swf.service#TaskTimedOut` => `TaskTimedOut`.
fn error_code(error_type: &str) -> &str {
    error_type.rsplit('#').next().unwrap_or(error_type)
}

/// An empty or absent token means the long poll expired without work.
fn map_poll_response(response: PollResponse) -> Option<ActivityTask> {
    match response.task_token {
        Some(token) if !token.is_empty() => Some(ActivityTask {
            token,
            input: response.input.unwrap_or_default(),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the activity-queue operations of the state-machine
/// service, SigV4-signed with environment credentials.
///
/// The endpoint is derived from the region and can be overridden with
/// `SFN_ENDPOINT_URL` for local stacks.
pub struct SfnClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    host: String,
    region: String,
    credentials: Credentials,
}

impl SfnClient {
    /// Build a client for the given region (normally the region field of
    /// the activity ARN). Falls back to `AWS_REGION` / `AWS_DEFAULT_REGION`.
    pub fn new(region: Option<&str>) -> Result<Self, SfnError> {
        let region = region
            .map(str::to_string)
            .or_else(|| std::env::var("AWS_REGION").ok())
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
            .ok_or_else(|| {
                SfnError::Config(
                    "no region: use an activity ARN with a region field or set AWS_REGION".into(),
                )
            })?;

        let endpoint = std::env::var("SFN_ENDPOINT_URL")
            .unwrap_or_else(|_| format!("https://states.{}.amazonaws.com/", region));
        let endpoint = reqwest::Url::parse(&endpoint)
            .map_err(|e| SfnError::Config(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SfnError::Config(format!(
                    "endpoint '{}' has no host",
                    endpoint
                )))
            }
        };

        let credentials = Credentials::from_env()?;

        // The poll is held server-side for up to ~60 seconds, so the read
        // timeout must exceed the poll window (>= 65 s).
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(70))
            .build()
            .map_err(|e| SfnError::Http(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            host,
            region,
            credentials,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn request(&self, target: &str, payload: String) -> Result<String, SfnError> {
        let start = std::time::Instant::now();

        let signed = sigv4::sign(
            &self.credentials,
            &self.region,
            &self.host,
            target,
            &payload,
            chrono::Utc::now(),
        );

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("content-type", sigv4::CONTENT_TYPE)
            .header("x-amz-target", target)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization)
            .body(payload);

        if let Some(token) = &self.credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SfnError::Http(e.to_string()))?;

        let status = response.status();
        metrics::histogram!("sfn.request.latency", "target" => target.to_string())
            .record(start.elapsed().as_secs_f64());

        if status.is_success() {
            return response
                .text()
                .await
                .map_err(|e| SfnError::Http(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) if !parsed.error_type.is_empty() => (
                error_code(&parsed.error_type).to_string(),
                parsed.message.unwrap_or_default(),
            ),
            _ => (format!("HTTP{}", status.as_u16()), body),
        };

        Err(SfnError::Service { code, message })
    }
}

#[async_trait]
impl ActivityService for SfnClient {
    async fn poll_task(
        &self,
        activity_arn: &str,
        worker_name: &str,
    ) -> Result<Option<ActivityTask>, SfnError> {
        let payload = serde_json::to_string(&PollRequest {
            activity_arn,
            worker_name,
        })
        .map_err(|e| SfnError::Parse(e.to_string()))?;

        let body = self
            .request("AWSStepFunctions.GetActivityTask", payload)
            .await?;

        let response: PollResponse =
            serde_json::from_str(&body).map_err(|e| SfnError::Parse(e.to_string()))?;

        Ok(map_poll_response(response))
    }

    async fn send_task_success(&self, token: &str, output: &str) -> Result<(), SfnError> {
        let payload = serde_json::to_string(&SuccessRequest {
            task_token: token,
            output,
        })
        .map_err(|e| SfnError::Parse(e.to_string()))?;

        self.request("AWSStepFunctions.SendTaskSuccess", payload)
            .await?;
        Ok(())
    }

    async fn send_task_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), SfnError> {
        let payload = serde_json::to_string(&FailureRequest {
            task_token: token,
            error,
            cause,
        })
        .map_err(|e| SfnError::Parse(e.to_string()))?;

        self.request("AWSStepFunctions.SendTaskFailure", payload)
            .await?;
        Ok(())
    }

    async fn send_task_heartbeat(&self, token: &str) -> Result<(), SfnError> {
        let payload = serde_json::to_string(&HeartbeatRequest { task_token: token })
            .map_err(|e| SfnError::Parse(e.to_string()))?;

        self.request("AWSStepFunctions.SendTaskHeartbeat", payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strips_namespace() {
        assert_eq!(
            error_code("com.amazonaws.swf.service#TaskTimedOut"),
            "TaskTimedOut"
        );
        assert_eq!(error_code("InvalidToken"), "InvalidToken");
        assert_eq!(error_code(""), "");
    }

    #[test]
    fn test_empty_poll_token_means_no_work() {
        assert!(map_poll_response(PollResponse {
            task_token: None,
            input: None,
        })
        .is_none());

        assert!(map_poll_response(PollResponse {
            task_token: Some(String::new()),
            input: Some("{}".into()),
        })
        .is_none());

        let task = map_poll_response(PollResponse {
            task_token: Some("AT-0".into()),
            input: Some("{\"foo\":\"bar\"}".into()),
        })
        .unwrap();
        assert_eq!(task.token, "AT-0");
        assert_eq!(task.input, "{\"foo\":\"bar\"}");
    }

    #[test]
    fn test_poll_input_defaults_to_empty() {
        let task = map_poll_response(PollResponse {
            task_token: Some("AT-1".into()),
            input: None,
        })
        .unwrap();
        assert_eq!(task.input, "");
    }
}
