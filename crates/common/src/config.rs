use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Worker server configuration, deserialized from the TOML config file.
///
/// CLI flags override individual keys after loading; see the server crate's
/// config loader.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base worker name; combined with host IP or pid into the name shown
    /// in the service's monitoring UI.
    #[serde(default = "default_name")]
    pub name: String,

    /// ARN of the activity this server polls.
    #[serde(default)]
    pub activity_arn: Option<String>,

    /// Worker process count. None means one per CPU core.
    #[serde(default)]
    pub processes: Option<u32>,

    /// Seconds between heartbeats for a running task. 0 disables heartbeats.
    #[serde(default)]
    pub heartbeat: u64,

    /// Tasks a worker process serves before it is killed and replaced.
    /// None or 0 disables recycling.
    #[serde(default = "default_maxtasksperchild")]
    pub maxtasksperchild: Option<u32>,

    /// Worker process start method.
    #[serde(default)]
    pub start_method: StartMethod,

    /// TCP port for the liveness endpoint. None or 0 disables it.
    #[serde(default = "default_healthcheck")]
    pub healthcheck: Option<u16>,

    /// Registry name of the task handler to instantiate in each worker
    /// process.
    #[serde(default)]
    pub worker: Option<String>,

    /// Supervisor override. Accepted for compatibility and ignored; the
    /// controller is statically dispatched.
    #[serde(default)]
    pub server: Option<String>,

    /// Opaque map handed to the task handler constructor.
    #[serde(default)]
    pub worker_config: Option<Value>,

    /// Opaque map kept on the server for operator use.
    #[serde(default)]
    pub server_config: Option<Value>,

    #[serde(default)]
    pub loglevel: LogLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            activity_arn: None,
            processes: None,
            heartbeat: 0,
            maxtasksperchild: default_maxtasksperchild(),
            start_method: StartMethod::default(),
            healthcheck: default_healthcheck(),
            worker: None,
            server: None,
            worker_config: None,
            server_config: None,
            loglevel: LogLevel::default(),
        }
    }
}

impl ServerConfig {
    /// Liveness port with 0 normalized away.
    pub fn healthcheck_port(&self) -> Option<u16> {
        self.healthcheck.filter(|p| *p != 0)
    }

    /// Recycle threshold with 0 normalized away.
    pub fn max_tasks_per_child(&self) -> Option<u32> {
        self.maxtasksperchild.filter(|m| *m != 0)
    }
}

fn default_name() -> String {
    "SfnPoolWorker".to_string()
}

fn default_maxtasksperchild() -> Option<u32> {
    Some(100)
}

fn default_healthcheck() -> Option<u16> {
    Some(8080)
}

/// How worker processes are created.
///
/// Only `spawn` (a fresh process image) is supported; `fork` and
/// `forkserver` are recognized for config compatibility and rejected by
/// validation, since the heartbeat task's runtime state is not fork-safe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMethod {
    #[default]
    Spawn,
    Fork,
    ForkServer,
}

impl StartMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartMethod::Spawn => "spawn",
            StartMethod::Fork => "fork",
            StartMethod::ForkServer => "forkserver",
        }
    }
}

impl<'de> Deserialize<'de> for StartMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            // Empty means "platform default", which is spawn here.
            "" | "spawn" => Ok(StartMethod::Spawn),
            "fork" => Ok(StartMethod::Fork),
            "forkserver" => Ok(StartMethod::ForkServer),
            other => Err(serde::de::Error::custom(format!(
                "unknown start_method '{}' (expected spawn, fork, forkserver or empty)",
                other
            ))),
        }
    }
}

/// Log verbosity, matching the service operator vocabulary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive string for the tracing env filter. `critical` has no
    /// tracing counterpart and maps to `error`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("invalid log level: {}", other)),
        }
    }
}
