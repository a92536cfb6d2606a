mod loader;
mod validation;

pub use loader::{load_config, resolved_processes, CliOverrides, ConfigError};
