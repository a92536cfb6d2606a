use sfnpool_common::arn::activity_region;
use sfnpool_common::config::{ServerConfig, StartMethod};

use crate::handlers;

use super::loader::ConfigError;

/// Validate the merged configuration.
///
/// Collects every problem before failing so the operator sees them all at
/// once; the server refuses to start on any.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_worker(config, &mut errors);
    validate_activity(config, &mut errors);
    validate_pool(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_worker(config: &ServerConfig, errors: &mut Vec<String>) {
    match config.worker.as_deref() {
        None | Some("") => {
            errors.push("worker must be set to a registered task handler".into());
        }
        Some(worker) => {
            let registry = handlers::builtin_registry();
            if !registry.contains(worker) {
                errors.push(format!(
                    "worker '{}' is not registered (known: {})",
                    worker,
                    registry.names().join(", ")
                ));
            }
        }
    }
}

fn validate_activity(config: &ServerConfig, errors: &mut Vec<String>) {
    match config.activity_arn.as_deref() {
        None | Some("") => {
            errors.push("activity_arn must be set".into());
        }
        Some(arn) => {
            if activity_region(arn).is_none() {
                errors.push(format!(
                    "activity_arn '{}' has no region field (expected at least four colon-separated fields)",
                    arn
                ));
            }
        }
    }
}

fn validate_pool(config: &ServerConfig, errors: &mut Vec<String>) {
    if config.processes == Some(0) {
        errors.push("processes must be >= 1 (omit it to use the CPU count)".into());
    }

    if config.start_method != StartMethod::Spawn {
        errors.push(format!(
            "start_method '{}' is not supported; worker processes are always spawned as fresh processes",
            config.start_method.as_str()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfnpool_common::config::ServerConfig;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            worker: Some("hello".into()),
            activity_arn: Some("arn:aws:states:us-west-2:000000000000:activity:hello".into()),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_unknown_worker_rejected() {
        let config = ServerConfig {
            worker: Some("nonsuch".into()),
            ..valid_config()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_arn_without_region_rejected() {
        let config = ServerConfig {
            activity_arn: Some("arn:aws".into()),
            ..valid_config()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_fork_start_method_rejected() {
        let config: ServerConfig = toml::from_str(
            r#"
            worker = "hello"
            activity_arn = "arn:aws:states:us-west-2:000000000000:activity:hello"
            start_method = "fork"
            "#,
        )
        .unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("start_method"));
    }

    #[test]
    fn test_toml_config_with_worker_config_table() {
        let config: ServerConfig = toml::from_str(
            r#"
            name = "HelloExample"
            worker = "hello"
            activity_arn = "arn:aws:states:us-west-2:000000000000:activity:hello"
            processes = 2
            heartbeat = 120
            maxtasksperchild = 50
            healthcheck = 9090
            loglevel = "warning"

            [worker_config]
            greeting = "Howdy"
            "#,
        )
        .unwrap();

        assert!(validate(&config).is_ok());
        assert_eq!(config.heartbeat, 120);
        assert_eq!(config.healthcheck_port(), Some(9090));
        assert_eq!(
            config
                .worker_config
                .as_ref()
                .and_then(|c| c.get("greeting"))
                .and_then(|v| v.as_str()),
            Some("Howdy")
        );
    }

    #[test]
    fn test_zero_processes_rejected() {
        let config = ServerConfig {
            processes: Some(0),
            ..valid_config()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("processes"));
    }
}
