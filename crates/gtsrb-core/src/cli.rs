//! Helpers shared by the command-line tools: logging setup and TOML config IO.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbosity 0 logs `info`, 1 logs
/// `debug` and anything higher logs `trace` for the pipeline crates.
pub fn setup_cli_logging(verbosity: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default_directive(verbosity)),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity > 0))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

fn default_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("warn,gtsrb_core={level},gtsrb_dataset={level},gtsrb_preprocess={level}")
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file {} does not exist",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

/// Renders a config as TOML, e.g. for the `config` subcommand.
pub fn to_toml_string<T>(config: &T) -> Result<String>
where
    T: Serialize,
{
    toml::to_string_pretty(config)
        .map_err(|e| Error::Serialization(format!("Failed to render config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::TempDir;

    #[test]
    fn test_default_directive_levels() {
        assert!(default_directive(0).contains("gtsrb_dataset=info"));
        assert!(default_directive(1).contains("gtsrb_dataset=debug"));
        assert!(default_directive(5).contains("gtsrb_dataset=trace"));
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result: Result<PipelineConfig> = load_toml_config(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pipeline.toml");
        let config = PipelineConfig::default();
        fs::write(&path, to_toml_string(&config).unwrap()).unwrap();

        let loaded: PipelineConfig = load_toml_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
