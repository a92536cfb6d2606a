use std::path::{Path, PathBuf};

use sfnpool_common::config::ServerConfig;

use super::validation;

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub worker: Option<String>,
    pub activity_arn: Option<String>,
    /// 0 means "use the CPU count".
    pub processes: Option<u32>,
    pub loglevel: Option<String>,
}

/// Load the server configuration: defaults, then the TOML file, then CLI
/// overrides, then validation. The server refuses to start on validation
/// failure.
pub fn load_config(path: Option<&Path>, overrides: CliOverrides) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;

            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?
        }
        None => ServerConfig::default(),
    };

    if let Some(worker) = overrides.worker {
        config.worker = Some(worker);
    }
    if let Some(activity_arn) = overrides.activity_arn {
        config.activity_arn = Some(activity_arn);
    }
    if let Some(processes) = overrides.processes {
        config.processes = if processes == 0 { None } else { Some(processes) };
    }
    if let Some(loglevel) = overrides.loglevel {
        config.loglevel = loglevel
            .parse()
            .map_err(|e: String| ConfigError::Validation(e))?;
    }

    validation::validate(&config)?;

    Ok(config)
}

/// Pool size: the configured process count, or one per CPU core.
pub fn resolved_processes(config: &ServerConfig) -> u32 {
    config.processes.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_with_cli_overrides() {
        let config = load_config(
            None,
            CliOverrides {
                worker: Some("hello".into()),
                activity_arn: Some("arn:aws:states:us-west-2:000000000000:activity:hello".into()),
                processes: Some(4),
                loglevel: Some("debug".into()),
            },
        )
        .unwrap();

        assert_eq!(config.worker.as_deref(), Some("hello"));
        assert_eq!(config.processes, Some(4));
        assert_eq!(resolved_processes(&config), 4);
        assert_eq!(config.loglevel.as_str(), "debug");
    }

    #[test]
    fn test_cli_processes_zero_means_cpu_count() {
        let config = load_config(
            None,
            CliOverrides {
                worker: Some("hello".into()),
                activity_arn: Some("arn:aws:states:us-west-2:000000000000:activity:hello".into()),
                processes: Some(0),
                loglevel: None,
            },
        )
        .unwrap();

        assert_eq!(config.processes, None);
        assert!(resolved_processes(&config) >= 1);
    }

    #[test]
    fn test_missing_required_keys_fail_validation() {
        let err = load_config(None, CliOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(
            Some(Path::new("/nonexistent/sfnpool.toml")),
            CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_invalid_loglevel_override() {
        let err = load_config(
            None,
            CliOverrides {
                worker: Some("hello".into()),
                activity_arn: Some("arn:aws:states:us-west-2:000000000000:activity:hello".into()),
                processes: None,
                loglevel: Some("loud".into()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
